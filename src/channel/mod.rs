//! # Pseudo-terminal relay channels.
//!
//! A [`Channel`] is one bidirectional byte-stream endpoint backed by a pty
//! pair. The supervisor reads and writes through the **hub** (master) side;
//! external parties — a spawned command process or human clients — use the
//! slave side, whose device path can be published as a symlink. The
//! supervisor also keeps its own **held** descriptor on the slave side so the
//! terminal's state (raw/cooked mode, flags) survives external disconnects.
//!
//! Open/close accounting: an inotify watch on the slave device path turns
//! every external open and close into an event; [`Channel::drain_notify`]
//! folds them into the `opens` counter. Writes to a channel with `opens == 0`
//! are discarded but reported as fully successful — there is nobody to read
//! them, so there is no back-pressure either; the tail of discarded bytes is
//! kept in a small [`DiscardTrace`] for diagnostics.
//!
//! Reads can be *paced*: [`Channel::read_byte`] declines to consume when the
//! elapsed time since a pacer's last write is below the configured delay.
//! This is the relay's only throttling mechanism — writes are never delayed,
//! the supervisor simply slows the reads that feed them and lets data queue
//! in the kernel terminal buffer.
//!
//! ## Contents
//! - [`Channel`] the pty-pair endpoint
//! - [`OutputRing`] the circular line-reassembly buffer
//! - [`pty`] low-level pty helpers

pub(crate) mod pty;
mod ring;

pub use ring::OutputRing;

use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
use nix::unistd::{read, write};
use tracing::{debug, trace, warn};

use crate::error::{ChannelError, SetupError};

/// Outcome of a single paced read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One byte was consumed.
    Byte(u8),
    /// The pacing delay has not elapsed; nothing was consumed.
    /// Carries the remaining wait.
    Deferred(Duration),
    /// The peer side is gone (end of stream).
    Closed,
}

/// One open/close accounting event observed on the slave path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyEvent {
    /// Somebody opened the slave side; carries the new open count.
    Opened(u32),
    /// Somebody closed the slave side; carries the new open count.
    Closed(u32),
    /// A close arrived while the count was already zero; ignored.
    Spurious,
}

/// Capacity of the discard trace ring.
const TRACE_CAPACITY: usize = 64;

/// Bounded ring of the most recently discarded bytes, for diagnostics.
#[derive(Debug)]
pub struct DiscardTrace {
    buf: [u8; TRACE_CAPACITY],
    len: usize,
    pos: usize,
    total: u64,
}

impl DiscardTrace {
    fn new() -> Self {
        Self {
            buf: [0; TRACE_CAPACITY],
            len: 0,
            pos: 0,
            total: 0,
        }
    }

    fn record(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.buf[self.pos] = b;
            self.pos = (self.pos + 1) % TRACE_CAPACITY;
            self.len = (self.len + 1).min(TRACE_CAPACITY);
        }
        self.total += bytes.len() as u64;
    }

    /// Total number of bytes ever discarded.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// The most recently discarded bytes, oldest first.
    pub fn tail(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        let start = (self.pos + TRACE_CAPACITY - self.len) % TRACE_CAPACITY;
        for i in 0..self.len {
            out.push(self.buf[(start + i) % TRACE_CAPACITY]);
        }
        out
    }
}

/// A bidirectional pty-backed relay endpoint.
///
/// Created by [`Channel::create`]; torn down by [`Channel::cleanup`] (also
/// run on drop). Cleanup is idempotent.
#[derive(Debug)]
pub struct Channel {
    path: PathBuf,
    link: Option<PathBuf>,
    hub: Option<OwnedFd>,
    held: Option<OwnedFd>,
    notify: Option<Inotify>,
    opens: u32,
    read_bytes: u64,
    write_bytes: u64,
    deferred_reads: u64,
    backpressure: u64,
    discards: DiscardTrace,
}

impl Channel {
    /// Opens a fresh pty pair and prepares the endpoint:
    /// hub side non-blocking, held side kept open (optionally raw), an
    /// open/close watch on the slave path, and — if `link` is given — a
    /// published symlink to the device.
    ///
    /// Fails if the link path already exists or any OS resource cannot be
    /// acquired; partially acquired resources are released before returning.
    pub fn create(link: Option<&Path>, raw: bool) -> Result<Self, SetupError> {
        if let Some(link) = link {
            if std::fs::symlink_metadata(link).is_ok() {
                return Err(SetupError::LinkExists {
                    path: link.to_owned(),
                });
            }
        }

        let pair = pty::open_pair(raw)?;

        // The held descriptor predates the watch, so the supervisor's own
        // open is never counted.
        let notify =
            Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC).map_err(SetupError::Watch)?;
        notify
            .add_watch(
                &pair.path,
                AddWatchFlags::IN_OPEN | AddWatchFlags::IN_CLOSE_WRITE | AddWatchFlags::IN_CLOSE_NOWRITE,
            )
            .map_err(SetupError::Watch)?;

        if let Some(link) = link {
            std::os::unix::fs::symlink(&pair.path, link).map_err(|source| {
                SetupError::PublishLink {
                    path: link.to_owned(),
                    source,
                }
            })?;
        }

        debug!(path = %pair.path.display(), link = ?link, "channel created");

        Ok(Self {
            path: pair.path,
            link: link.map(Path::to_owned),
            hub: Some(pair.hub),
            held: Some(pair.held),
            notify: Some(notify),
            opens: 0,
            read_bytes: 0,
            write_bytes: 0,
            deferred_reads: 0,
            backpressure: 0,
            discards: DiscardTrace::new(),
        })
    }

    /// Device path of the slave side.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Published link path, if any.
    pub fn link(&self) -> Option<&Path> {
        self.link.as_deref()
    }

    /// Current external open count of the slave side.
    pub fn opens(&self) -> u32 {
        self.opens
    }

    /// Total bytes read through the hub.
    pub fn read_bytes(&self) -> u64 {
        self.read_bytes
    }

    /// Total bytes written through the hub.
    pub fn write_bytes(&self) -> u64 {
        self.write_bytes
    }

    /// Times a paced read declined to consume.
    pub fn deferred_reads(&self) -> u64 {
        self.deferred_reads
    }

    /// Times a write hit back-pressure and was cut short.
    pub fn backpressure(&self) -> u64 {
        self.backpressure
    }

    /// Trace of bytes discarded for lack of readers.
    pub fn discards(&self) -> &DiscardTrace {
        &self.discards
    }

    /// Raw hub descriptor for wait-set registration.
    pub fn hub_fd(&self) -> Option<RawFd> {
        self.hub.as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Raw notification descriptor for wait-set registration.
    pub fn notify_fd(&self) -> Option<RawFd> {
        self.notify.as_ref().map(|n| n.as_fd().as_raw_fd())
    }

    /// Attempts to consume one byte from the hub.
    ///
    /// When `pacer` is set and the delay has not yet elapsed since the
    /// pacer's last write, nothing is consumed and
    /// [`ReadOutcome::Deferred`] reports the remaining wait — this is the
    /// relay's sole throttling mechanism.
    ///
    /// Returns [`ChannelError::WouldBlock`] when no data is available.
    pub fn read_byte(
        &mut self,
        pacer: Option<(Instant, Duration)>,
    ) -> Result<ReadOutcome, ChannelError> {
        if let Some((last_write, delay)) = pacer {
            if !delay.is_zero() {
                let elapsed = last_write.elapsed();
                if elapsed < delay {
                    self.deferred_reads += 1;
                    return Ok(ReadOutcome::Deferred(delay - elapsed));
                }
            }
        }

        let hub = self.hub.as_ref().ok_or(ChannelError::Closed)?;
        let mut byte = [0u8; 1];
        match read(hub.as_fd(), &mut byte) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(_) => {
                self.read_bytes += 1;
                Ok(ReadOutcome::Byte(byte[0]))
            }
            Err(Errno::EAGAIN) => Err(ChannelError::WouldBlock),
            // A pty master reports EIO when the slave side is gone.
            Err(Errno::EIO) => Ok(ReadOutcome::Closed),
            Err(e) => Err(ChannelError::Io(e)),
        }
    }

    /// Writes bytes to the hub.
    ///
    /// With no external reader (`opens == 0`) the data is discarded but the
    /// write reports full success; the tail of discarded bytes is kept in
    /// the [`DiscardTrace`]. With a reader present, a full kernel buffer
    /// surfaces as the retryable [`ChannelError::WouldBlock`].
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, ChannelError> {
        let Some(hub) = self.hub.as_ref() else {
            return Err(ChannelError::Closed);
        };
        if self.opens == 0 {
            self.discards.record(buf);
            trace!(
                path = %self.path.display(),
                len = buf.len(),
                "no reader, write discarded"
            );
            return Ok(buf.len());
        }

        match write(hub.as_fd(), buf) {
            Ok(n) => {
                self.write_bytes += n as u64;
                Ok(n)
            }
            Err(Errno::EAGAIN) => Err(ChannelError::WouldBlock),
            Err(e) => Err(ChannelError::Io(e)),
        }
    }

    /// Records one back-pressure incident on this channel.
    pub fn note_backpressure(&mut self) {
        self.backpressure += 1;
        if self.backpressure == 1 || self.backpressure.is_power_of_two() {
            warn!(
                path = %self.path.display(),
                count = self.backpressure,
                "terminal buffer full, relay byte dropped"
            );
        }
    }

    /// Drains pending open/close notifications and folds them into the open
    /// counter.
    ///
    /// A close with `opens == 0` is logged and ignored: kernel delivery
    /// order can race cleanup, and the counter never goes below zero.
    pub fn drain_notify(&mut self) -> Result<Vec<NotifyEvent>, ChannelError> {
        let notify = self.notify.as_ref().ok_or(ChannelError::Closed)?;
        let mut out = Vec::new();
        loop {
            let events = match notify.read_events() {
                Ok(events) => events,
                Err(Errno::EAGAIN) => break,
                Err(e) => return Err(ChannelError::Io(e)),
            };
            if events.is_empty() {
                break;
            }
            for ev in events {
                if ev.mask.contains(AddWatchFlags::IN_OPEN) {
                    self.opens += 1;
                    out.push(NotifyEvent::Opened(self.opens));
                } else if ev.mask.contains(AddWatchFlags::IN_CLOSE_WRITE)
                    || ev.mask.contains(AddWatchFlags::IN_CLOSE_NOWRITE)
                {
                    if self.opens == 0 {
                        warn!(
                            path = %self.path.display(),
                            "close notification with zero opens, ignoring"
                        );
                        out.push(NotifyEvent::Spurious);
                    } else {
                        self.opens -= 1;
                        out.push(NotifyEvent::Closed(self.opens));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Releases all descriptors and removes the published link. Idempotent.
    pub fn cleanup(&mut self) {
        if self.hub.is_none() && self.held.is_none() && self.notify.is_none() {
            return;
        }
        debug!(path = %self.path.display(), "channel cleanup");
        self.hub = None;
        self.held = None;
        self.notify = None;
        if let Some(link) = &self.link {
            match std::fs::remove_file(link) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(link = %link.display(), error = %e, "failed to remove link"),
            }
        }
        self.opens = 0;
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Read as _;
    use std::thread::sleep;

    fn wait_notify(ch: &mut Channel) -> Vec<NotifyEvent> {
        // inotify delivery is asynchronous; poll briefly.
        for _ in 0..100 {
            let events = ch.drain_notify().expect("drain");
            if !events.is_empty() {
                return events;
            }
            sleep(Duration::from_millis(10));
        }
        Vec::new()
    }

    #[test]
    fn test_create_publishes_and_cleanup_removes_link() {
        let dir = tempfile::tempdir().expect("tempdir");
        let link = dir.path().join("tty-a");
        let mut ch = Channel::create(Some(&link), false).expect("create");

        let meta = std::fs::symlink_metadata(&link).expect("link exists");
        assert!(meta.file_type().is_symlink());
        assert_eq!(std::fs::read_link(&link).expect("read link"), ch.path());

        ch.cleanup();
        assert!(std::fs::symlink_metadata(&link).is_err());

        // Cleanup is idempotent.
        ch.cleanup();
        assert!(std::fs::symlink_metadata(&link).is_err());
    }

    #[test]
    fn test_create_fails_fast_on_existing_link() {
        let dir = tempfile::tempdir().expect("tempdir");
        let link = dir.path().join("taken");
        std::fs::write(&link, b"occupied").expect("write");

        let err = Channel::create(Some(&link), false).expect_err("collision");
        assert!(matches!(err, SetupError::LinkExists { .. }));
        // The occupant is untouched.
        assert_eq!(std::fs::read(&link).expect("read"), b"occupied");
    }

    #[test]
    fn test_no_reader_write_discards_but_succeeds() {
        let mut ch = Channel::create(None, false).expect("create");
        assert_eq!(ch.opens(), 0);

        let n = ch.write(b"dropped on the floor").expect("write");
        assert_eq!(n, b"dropped on the floor".len());
        assert_eq!(ch.write_bytes(), 0);
        assert_eq!(ch.discards().total(), b"dropped on the floor".len() as u64);
        assert!(ch
            .discards()
            .tail()
            .ends_with(b"dropped on the floor"));
    }

    #[test]
    fn test_open_close_accounting_balances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let link = dir.path().join("tty-acct");
        let mut ch = Channel::create(Some(&link), false).expect("create");

        let f1 = OpenOptions::new().read(true).write(true).open(ch.path()).expect("open 1");
        let ev = wait_notify(&mut ch);
        assert!(ev.contains(&NotifyEvent::Opened(1)), "got {ev:?}");

        let f2 = OpenOptions::new().read(true).write(true).open(ch.path()).expect("open 2");
        let ev = wait_notify(&mut ch);
        assert!(ev.contains(&NotifyEvent::Opened(2)), "got {ev:?}");

        drop(f1);
        drop(f2);
        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.extend(wait_notify(&mut ch));
        }
        assert!(seen.contains(&NotifyEvent::Closed(0)), "got {seen:?}");
        assert_eq!(ch.opens(), 0);
    }

    #[test]
    fn test_paced_read_defers_without_consuming() {
        let mut ch = Channel::create(None, false).expect("create");

        // Push a byte in via the held slave end.
        let held = OpenOptions::new()
            .read(true)
            .write(true)
            .open(ch.path())
            .expect("open slave");
        nix::unistd::write(&held, b"x").expect("slave write");

        // Give the kernel a moment to make it readable on the hub.
        sleep(Duration::from_millis(50));

        let last_write = Instant::now();
        let delay = Duration::from_millis(200);
        match ch.read_byte(Some((last_write, delay))).expect("read") {
            ReadOutcome::Deferred(remaining) => {
                assert!(remaining <= delay);
                assert!(remaining > Duration::from_millis(50));
            }
            other => panic!("expected deferral, got {other:?}"),
        }
        assert_eq!(ch.read_bytes(), 0);
        assert_eq!(ch.deferred_reads(), 1);

        // Once the delay has elapsed the byte comes through.
        sleep(Duration::from_millis(250));
        match ch.read_byte(Some((last_write, delay))).expect("read") {
            ReadOutcome::Byte(b) => assert_eq!(b, b'x'),
            other => panic!("expected byte, got {other:?}"),
        }
    }

    #[test]
    fn test_write_reaches_external_reader() {
        let mut ch = Channel::create(None, true).expect("create");

        let mut reader = OpenOptions::new()
            .read(true)
            .write(true)
            .open(ch.path())
            .expect("open slave");
        wait_notify(&mut ch);
        assert_eq!(ch.opens(), 1);

        let n = ch.write(b"ping").expect("write");
        assert_eq!(n, 4);
        assert_eq!(ch.write_bytes(), 4);

        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).expect("slave read");
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn test_read_after_cleanup_reports_closed() {
        let mut ch = Channel::create(None, false).expect("create");
        ch.cleanup();
        assert!(matches!(ch.read_byte(None), Err(ChannelError::Closed)));
        assert!(matches!(ch.write(b"x"), Err(ChannelError::Closed)));
    }
}
