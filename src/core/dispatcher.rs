//! # Event dispatcher: the single-threaded readiness wait set.
//!
//! The [`Dispatcher`] owns the process's one and only scheduler: a readiness
//! multiplexer mapping registered descriptors back to caller-supplied
//! *bindings* (a cloneable sum type identifying the handler and its object).
//! [`Dispatcher::poll`] blocks until descriptors fire, then reports
//! `(binding, ReadyMask)` pairs for the caller to dispatch; handlers run to
//! completion on the calling thread with no preemption.
//!
//! ```text
//! register(fd, binding) ──► token ──┐
//!                                   │  poll() ──► [(binding, mask), ...]
//! schedule(at, binding) ──► timer ──┘
//! ```
//!
//! ## Readiness semantics
//! The underlying wait set is edge-triggered, so every handler must drain its
//! descriptor until it would block — readiness is only re-reported after new
//! activity. Process-exit descriptors fire their single edge exactly once.
//!
//! ## Deadlines
//! A paced read that declines to consume leaves data buffered with no future
//! edge to re-announce it. [`Dispatcher::schedule`] registers a deadline for
//! the binding; the nearest deadline bounds the poll timeout and due bindings
//! are reported with [`ReadyMask::TIMER`], telling the handler to retry its
//! drain directly.
//!
//! ## Waker
//! A wake handle (see [`Dispatcher::wake_handle`]) fires the reserved waker
//! binding from any thread; the supervisor maps it to an orderly loop exit.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::error::DispatchError;

bitflags! {
    /// Why a binding fired.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReadyMask: u8 {
        /// Data (or an exit notification) is available.
        const READABLE = 0b0001;
        /// The peer endpoint hung up.
        const CLOSED = 0b0010;
        /// The descriptor is in an error state.
        const ERROR = 0b0100;
        /// A scheduled deadline came due; no descriptor readiness implied.
        const TIMER = 0b1000;
    }
}

/// What the caller's handler decided after a fired binding was serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Keep dispatching.
    Continue,
    /// Leave the event loop cleanly.
    Exit,
}

/// Wakes the dispatcher from any thread, requesting an orderly loop exit.
#[derive(Clone)]
pub struct WakeHandle {
    waker: Arc<Waker>,
}

impl WakeHandle {
    /// Fires the waker. Errors are reported on the dispatcher side.
    pub fn wake(&self) {
        let _ = self.waker.wake();
    }
}

/// Token reserved for the waker; descriptor tokens start above it.
const WAKER_TOKEN: Token = Token(0);

/// Single-threaded readiness-based dispatcher.
///
/// Generic over the binding type `T`; the dispatcher never interprets
/// bindings, it only hands clones of them back when their source fires.
pub struct Dispatcher<T> {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    waker_binding: T,
    bindings: HashMap<Token, (RawFd, T)>,
    tokens: HashMap<RawFd, Token>,
    deadlines: Vec<(Instant, T)>,
    next_token: usize,
}

impl<T: Clone> Dispatcher<T> {
    /// Creates the wait set. `waker_binding` is reported when the wake
    /// handle fires.
    pub fn new(waker_binding: T) -> Result<Self, DispatchError> {
        let poll = Poll::new().map_err(DispatchError::Create)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN).map_err(DispatchError::Waker)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(256),
            waker: Arc::new(waker),
            waker_binding,
            bindings: HashMap::new(),
            tokens: HashMap::new(),
            deadlines: Vec::new(),
            next_token: 1,
        })
    }

    /// Returns a cloneable handle that wakes the loop from any thread.
    pub fn wake_handle(&self) -> WakeHandle {
        WakeHandle {
            waker: Arc::clone(&self.waker),
        }
    }

    /// Registers a descriptor for read readiness under the given binding.
    pub fn register(&mut self, fd: RawFd, binding: T) -> Result<(), DispatchError> {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, Interest::READABLE)
            .map_err(|source| DispatchError::Register { fd, source })?;
        self.bindings.insert(token, (fd, binding));
        self.tokens.insert(fd, token);
        Ok(())
    }

    /// Removes a descriptor from the wait set.
    pub fn deregister(&mut self, fd: RawFd) -> Result<(), DispatchError> {
        let token = self
            .tokens
            .remove(&fd)
            .ok_or_else(|| DispatchError::Deregister {
                fd,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "fd not registered"),
            })?;
        self.bindings.remove(&token);
        self.poll
            .registry()
            .deregister(&mut SourceFd(&fd))
            .map_err(|source| DispatchError::Deregister { fd, source })?;
        Ok(())
    }

    /// Schedules a deadline after which the binding fires with
    /// [`ReadyMask::TIMER`].
    pub fn schedule(&mut self, at: Instant, binding: T) {
        self.deadlines.push((at, binding));
    }

    /// Blocks until at least one source fires, then appends
    /// `(binding, mask)` pairs to `fired`.
    ///
    /// Due deadlines are reported even when no descriptor is ready; the wait
    /// is bounded by the nearest pending deadline.
    pub fn poll(&mut self, fired: &mut Vec<(T, ReadyMask)>) -> Result<(), DispatchError> {
        let timeout = self.nearest_deadline().map(|at| {
            let now = Instant::now();
            if at <= now {
                Duration::ZERO
            } else {
                at - now
            }
        });

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(DispatchError::Wait(e)),
        }

        for event in self.events.iter() {
            if event.token() == WAKER_TOKEN {
                fired.push((self.waker_binding.clone(), ReadyMask::READABLE));
                continue;
            }
            let Some((_, binding)) = self.bindings.get(&event.token()) else {
                // Raced with a deregistration in this batch; stale events
                // are dropped.
                continue;
            };
            let mut mask = ReadyMask::empty();
            if event.is_readable() {
                mask |= ReadyMask::READABLE;
            }
            if event.is_read_closed() || event.is_write_closed() {
                mask |= ReadyMask::CLOSED;
            }
            if event.is_error() {
                mask |= ReadyMask::ERROR;
            }
            if mask.is_empty() {
                mask = ReadyMask::READABLE;
            }
            fired.push((binding.clone(), mask));
        }

        // Deadlines fire after descriptor events so a drained source is not
        // retried in the same batch it already serviced.
        let now = Instant::now();
        let mut i = 0;
        while i < self.deadlines.len() {
            if self.deadlines[i].0 <= now {
                let (_, binding) = self.deadlines.swap_remove(i);
                fired.push((binding, ReadyMask::TIMER));
            } else {
                i += 1;
            }
        }

        Ok(())
    }

    fn nearest_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().map(|(at, _)| *at).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{pipe, write};
    use std::os::fd::AsRawFd;

    fn fired_of(d: &mut Dispatcher<u32>) -> Vec<(u32, ReadyMask)> {
        let mut fired = Vec::new();
        d.poll(&mut fired).expect("poll");
        fired
    }

    #[test]
    fn test_readable_descriptor_fires_its_binding() {
        let mut d = Dispatcher::new(0u32).expect("dispatcher");
        let (rx, tx) = pipe().expect("pipe");
        d.register(rx.as_raw_fd(), 7).expect("register");

        write(&tx, b"x").expect("write");
        let fired = fired_of(&mut d);
        assert!(fired
            .iter()
            .any(|(b, m)| *b == 7 && m.contains(ReadyMask::READABLE)));
    }

    #[test]
    fn test_deregistered_descriptor_stops_firing() {
        let mut d = Dispatcher::new(0u32).expect("dispatcher");
        let (rx, tx) = pipe().expect("pipe");
        d.register(rx.as_raw_fd(), 7).expect("register");
        write(&tx, b"x").expect("write");
        let _ = fired_of(&mut d);

        d.deregister(rx.as_raw_fd()).expect("deregister");
        write(&tx, b"y").expect("write");

        // Only a deadline bounds this poll; the pipe must stay silent.
        d.schedule(Instant::now() + Duration::from_millis(50), 99);
        let fired = fired_of(&mut d);
        assert!(fired.iter().all(|(b, _)| *b != 7), "got {fired:?}");
    }

    #[test]
    fn test_deregister_unknown_fd_is_an_error() {
        let mut d = Dispatcher::new(0u32).expect("dispatcher");
        assert!(matches!(
            d.deregister(997),
            Err(DispatchError::Deregister { fd: 997, .. })
        ));
    }

    #[test]
    fn test_due_deadline_fires_without_readiness() {
        let mut d = Dispatcher::new(0u32).expect("dispatcher");
        let start = Instant::now();
        d.schedule(start + Duration::from_millis(30), 42);

        let fired = fired_of(&mut d);
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert_eq!(fired, vec![(42, ReadyMask::TIMER)]);

        // Fired deadlines are one-shot.
        d.schedule(Instant::now() + Duration::from_millis(10), 1);
        let fired = fired_of(&mut d);
        assert_eq!(fired, vec![(1, ReadyMask::TIMER)]);
    }

    #[test]
    fn test_wake_handle_fires_waker_binding() {
        let mut d = Dispatcher::new(0u32).expect("dispatcher");
        let handle = d.wake_handle();

        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            handle.wake();
        });

        let fired = fired_of(&mut d);
        t.join().expect("join");
        assert!(fired.iter().any(|(b, _)| *b == 0));
    }

    #[test]
    fn test_closed_peer_reports_closed_mask() {
        let mut d = Dispatcher::new(0u32).expect("dispatcher");
        let (rx, tx) = pipe().expect("pipe");
        d.register(rx.as_raw_fd(), 7).expect("register");
        drop(tx);

        let fired = fired_of(&mut d);
        let (_, mask) = fired.iter().find(|(b, _)| *b == 7).expect("fired");
        assert!(mask.contains(ReadyMask::CLOSED) || mask.contains(ReadyMask::READABLE));
    }
}
