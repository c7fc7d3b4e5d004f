//! # Runtime events emitted by the supervisor.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Command lifecycle**: added, started, exited, restart scheduled,
//!   stopped, removed, start failure
//! - **Channel accounting**: client/broadcast opens and closes, line overflow
//! - **Shutdown**: shutdown requested, idle exit
//! - **Subscriber faults**: a subscriber panicked while handling an event
//!
//! The [`Event`] struct carries optional metadata (command name, pid, exit
//! status, delays, open counts) set depending on the kind.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. All events are produced on the single dispatcher thread,
//! so `seq` order is also emission order.
//!
//! ## Example
//! ```rust
//! use ptyherd::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::CommandExited)
//!     .with_name("worker")
//!     .with_status(1);
//!
//! assert_eq!(ev.kind, EventKind::CommandExited);
//! assert_eq!(ev.name.as_deref(), Some("worker"));
//! assert_eq!(ev.status, Some(1));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::policies::RestartSource;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Command lifecycle ===
    /// A command was created and registered.
    ///
    /// Sets: `name`.
    CommandAdded,

    /// A command process was spawned.
    ///
    /// Sets: `name`, `pid`, `restarts`.
    CommandStarted,

    /// A command process exited on its own (expected or not).
    ///
    /// Sets: `name`, `status`.
    CommandExited,

    /// A respawn was scheduled after an exit.
    ///
    /// Sets: `name`, `delay_ms`, `source`, `restarts`.
    RestartScheduled,

    /// A command process was stopped by the supervisor.
    ///
    /// Sets: `name`, `status`, `reason` (`"forced"` for forced stops).
    CommandStopped,

    /// A command was cleaned up and removed from the registry.
    ///
    /// Sets: `name`.
    CommandRemoved,

    /// A spawn attempt failed at runtime (restart or lazy start).
    ///
    /// Sets: `name`, `reason`.
    StartFailed,

    // === Channel accounting ===
    /// An external client opened a command's published terminal.
    ///
    /// Sets: `name`, `opens`.
    ClientOpened,

    /// An external client closed a command's published terminal.
    ///
    /// Sets: `name`, `opens`.
    ClientClosed,

    /// A client opened the broadcast terminal.
    ///
    /// Sets: `opens`.
    BroadcastOpened,

    /// A client closed the broadcast terminal.
    ///
    /// Sets: `opens`.
    BroadcastClosed,

    /// A command produced a line longer than the output buffer.
    ///
    /// Sets: `name`.
    LineOverflowed,

    // === Shutdown ===
    /// Orderly shutdown was requested (signal or shutdown handle).
    ///
    /// Sets: `reason`.
    ShutdownRequested,

    /// The registry emptied with exit-on-idle set; the loop is ending.
    IdleExit,

    // === Subscriber faults ===
    /// A subscriber panicked while handling an event.
    ///
    /// Sets: `name` (subscriber name), `reason` (panic message).
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Command (or subscriber) name, if applicable.
    pub name: Option<Arc<str>>,
    /// Process id, if applicable.
    pub pid: Option<i32>,
    /// Exit status, if applicable.
    pub status: Option<i32>,
    /// Restart delay in milliseconds, if applicable.
    pub delay_ms: Option<u64>,
    /// Open count of the affected terminal after the event.
    pub opens: Option<u32>,
    /// Restart count of the command.
    pub restarts: Option<u32>,
    /// Human-readable reason (errors, panic messages, stop mode).
    pub reason: Option<Arc<str>>,
    /// Whether a scheduled restart followed a success or a failure.
    pub source: Option<RestartSource>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// the next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            name: None,
            pid: None,
            status: None,
            delay_ms: None,
            opens: None,
            restarts: None,
            reason: None,
            source: None,
        }
    }

    /// Attaches a command or subscriber name.
    #[inline]
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches a process id.
    #[inline]
    pub fn with_pid(mut self, pid: i32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches an exit status.
    #[inline]
    pub fn with_status(mut self, status: i32) -> Self {
        self.status = Some(status);
        self
    }

    /// Attaches a restart delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Attaches a terminal open count.
    #[inline]
    pub fn with_opens(mut self, opens: u32) -> Self {
        self.opens = Some(opens);
        self
    }

    /// Attaches a restart count.
    #[inline]
    pub fn with_restarts(mut self, restarts: u32) -> Self {
        self.restarts = Some(restarts);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches the restart source (success vs failure).
    #[inline]
    pub fn with_source(mut self, source: RestartSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_name(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }
}
