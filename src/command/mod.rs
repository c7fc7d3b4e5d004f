//! # Command: the process-lifecycle state machine.
//!
//! A [`Command`] owns two [`Channel`]s — one wired to the spawned process
//! (its controlling terminal) and one published for external clients — plus
//! the output ring buffer used for line-buffered broadcast.
//!
//! ## Lifecycle
//! ```text
//! create ──► idle ──► start ──► running ──► exit / stop ──► idle
//!                       ▲                        │
//!                       └── restart (delayed) ◄──┘
//! cleanup ──► destroyed (terminal)
//! ```
//!
//! - `create` allocates the client channel **first**, so a link collision
//!   fails before any other resource is touched, then the process channel
//!   and the optional output log. No process is spawned.
//! - `start` forks the child, which joins a new session, adopts the process
//!   channel's slave device as its controlling terminal and stdio, optionally
//!   enters raw mode, sleeps the start delay (restart throttling happens in
//!   the child, never in the supervisor), and execs `$SHELL -c <cmdline>`.
//!   The parent takes a non-blocking close-on-exec pidfd; `pid` and the
//!   pidfd are valid together or not at all.
//! - stopping sends the stop string (paced, synchronous), then SIGTERM, waits
//!   the grace window on the pidfd and escalates to SIGKILL, retrying until
//!   the child is reaped. Exit statuses from signals are reported as
//!   `128 + signo`.
//! - `cleanup` is idempotent: it force-stops a running process and releases
//!   both channels.

mod spec;

pub use spec::CommandSpec;

use std::env;
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write as _};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::CommandExt;
use std::process::Command as StdCommand;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitid, waitpid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::channel::{Channel, OutputRing};
use crate::config::{Config, RING_CAPACITY};
use crate::error::{ChannelError, SetupError};

/// Result of absorbing one output byte, used by the broadcast relay.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OutputStatus {
    /// The byte completed a line.
    pub newline: bool,
    /// The push overflowed the ring buffer.
    pub overflowed: bool,
}

/// One supervised command and its relay state.
#[derive(Debug)]
pub(crate) struct Command {
    pub(crate) name: String,
    pub(crate) command_line: String,
    /// Broadcast line prefix, `"<name>: "`.
    pub(crate) prefix: Vec<u8>,
    pub(crate) stop_string: Option<String>,
    pub(crate) delay: Duration,
    pub(crate) restart: bool,
    pub(crate) delete_on_exit: bool,

    /// Channel wired to the spawned process.
    pub(crate) process: Channel,
    /// Channel published for external clients.
    pub(crate) client: Channel,
    pub(crate) ring: OutputRing,
    log: Option<File>,

    pid: Option<Pid>,
    pidfd: Option<OwnedFd>,
    pub(crate) exit_status: Option<i32>,
    pub(crate) restarts: u32,
    pub(crate) last_write: Option<Instant>,
    destroyed: bool,
}

impl Command {
    /// Allocates both channels and the output log. Does not spawn a process.
    pub(crate) fn create(spec: &CommandSpec, cfg: &Config) -> Result<Self, SetupError> {
        // Client channel first: a name or link collision must fail fast,
        // before any process-side resource exists.
        let client = Channel::create(Some(&spec.link_or_name()), cfg.raw_mode)?;
        let process = Channel::create(None, cfg.raw_mode)?;

        let log = match spec.log() {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| SetupError::Log {
                        path: path.clone(),
                        source,
                    })?,
            ),
            None => None,
        };

        Ok(Self {
            name: spec.name().to_string(),
            command_line: spec.command_line().to_string(),
            prefix: format!("{}: ", spec.name()).into_bytes(),
            stop_string: spec.stop_string().map(str::to_owned),
            delay: cfg.delay_or_default(spec.delay()),
            restart: spec.restart(),
            delete_on_exit: cfg.exit_on_idle,
            process,
            client,
            ring: OutputRing::new(RING_CAPACITY),
            log,
            pid: None,
            pidfd: None,
            exit_status: None,
            restarts: 0,
            last_write: None,
            destroyed: false,
        })
    }

    /// A command is running iff its pid (and thus its pidfd) is valid.
    pub(crate) fn is_running(&self) -> bool {
        self.pid.is_some()
    }

    pub(crate) fn pid(&self) -> Option<i32> {
        self.pid.map(Pid::as_raw)
    }

    /// Raw process-exit descriptor for wait-set registration.
    pub(crate) fn pidfd_raw(&self) -> Option<RawFd> {
        self.pidfd.as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Pacing reference for reads that feed this command.
    pub(crate) fn pacer(&self) -> Option<(Instant, Duration)> {
        self.last_write.map(|lw| (lw, self.delay))
    }

    /// Spawns the command process.
    ///
    /// Fails with [`SetupError::AlreadyRunning`] if a process exists. The
    /// `start_delay` sleep happens in the child before exec.
    pub(crate) fn start(&mut self, raw: bool, start_delay: Duration) -> Result<(), SetupError> {
        if self.is_running() {
            return Err(SetupError::AlreadyRunning {
                name: self.name.clone(),
            });
        }

        let shell = env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string());
        let slave_path = CString::new(self.process.path().as_os_str().as_bytes())
            .map_err(|e| SetupError::Spawn(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let mut command = StdCommand::new(&shell);
        command.arg("-c").arg(&self.command_line);
        unsafe {
            command.pre_exec(move || child_setup(&slave_path, raw, start_delay));
        }

        let child = command.spawn().map_err(SetupError::Spawn)?;
        let pid = child.id() as i32;
        // Reaping goes through the pidfd, never through the Child handle.
        drop(child);

        let pidfd = match pidfd_open(pid) {
            Ok(fd) => fd,
            Err(source) => {
                let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
                let _ = waitpid(Pid::from_raw(pid), None);
                return Err(SetupError::ProcessHandle { pid, source });
            }
        };

        debug!(command = %self.name, pid, "spawned");
        self.pid = Some(Pid::from_raw(pid));
        self.pidfd = Some(pidfd);
        Ok(())
    }

    /// Writes one byte to the process channel, stamping the last-write time
    /// used by paced reads.
    pub(crate) fn write_byte(&mut self, byte: u8) -> Result<usize, ChannelError> {
        let n = self.process.write(&[byte])?;
        self.last_write = Some(Instant::now());
        Ok(n)
    }

    /// Absorbs one byte of process output: ring buffer, output log, and the
    /// mirror to the client channel. Broadcast mirroring is the caller's
    /// decision.
    pub(crate) fn absorb_output(&mut self, byte: u8) -> OutputStatus {
        let overflowed = self.ring.push(byte);

        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.write_all(&[byte]) {
                warn!(command = %self.name, error = %e, "output log write failed");
            }
        }

        match self.client.write(&[byte]) {
            Ok(_) => {}
            Err(ChannelError::WouldBlock) => self.client.note_backpressure(),
            Err(e) => warn!(command = %self.name, error = %e, "client mirror failed"),
        }

        OutputStatus {
            newline: byte == b'\n',
            overflowed,
        }
    }

    /// True when a non-forced stop is allowed: nobody watches the client
    /// channel and nobody watches the broadcast channel.
    pub(crate) fn can_stop(&self, force: bool, broadcast_opens: u32) -> bool {
        force || (self.client.opens() == 0 && broadcast_opens == 0)
    }

    /// Sends the stop string, if one applies: the per-command string wins
    /// over the global one; a leading newline always goes first; characters
    /// are paced by the command's write delay.
    ///
    /// Runs synchronously and blocks the calling thread for the duration.
    pub(crate) fn send_stop_string(&mut self, global: Option<&str>) {
        let stop = match self.stop_string.clone() {
            Some(s) => Some(s),
            None => global.map(str::to_owned),
        };
        let Some(stop) = stop else { return };

        debug!(command = %self.name, stop = %stop, "sending stop string");
        if let Err(e) = self.write_byte(b'\n') {
            warn!(command = %self.name, error = %e, "stop string write failed");
            return;
        }
        for byte in stop.bytes() {
            if let Err(e) = self.write_byte(byte) {
                warn!(command = %self.name, error = %e, "stop string write failed");
                return;
            }
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
        }
    }

    /// Terminates the running process: SIGTERM, grace wait on the pidfd,
    /// SIGKILL escalation, repeated until the exit notification fires; then
    /// reaps and records the exit status.
    ///
    /// The retry loop is unbounded by design — the supervisor must not
    /// return until the child is actually reaped.
    pub(crate) fn terminate(&mut self, grace: Duration) -> Result<i32, Errno> {
        let (pid, pidfd) = match (self.pid.take(), self.pidfd.take()) {
            (Some(pid), Some(pidfd)) => (pid, pidfd),
            _ => return Err(Errno::ESRCH),
        };

        if let Err(e) = kill(pid, Signal::SIGTERM) {
            // ESRCH means it already exited; the pidfd still yields status.
            if e != Errno::ESRCH {
                warn!(command = %self.name, error = %e, "SIGTERM failed");
            }
        }

        loop {
            let mut fds = [PollFd::new(pidfd.as_fd(), PollFlags::POLLIN)];
            let timeout = PollTimeout::try_from(grace).unwrap_or(PollTimeout::MAX);
            match poll(&mut fds, timeout) {
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e),
                Ok(0) => {
                    warn!(
                        command = %self.name,
                        pid = pid.as_raw(),
                        "did not exit within grace, escalating to SIGKILL"
                    );
                    let _ = kill(pid, Signal::SIGKILL);
                }
                Ok(_) => break,
            }
        }

        let status = reap_status(pidfd.as_fd())?;
        self.exit_status = Some(status);
        debug!(command = %self.name, status, "terminated");
        Ok(status)
    }

    /// Collects the exit status after the dispatcher reported the pidfd
    /// ready. Resets pid and pidfd to invalid.
    pub(crate) fn reap(&mut self) -> Result<i32, Errno> {
        let pidfd = self.pidfd.take().ok_or(Errno::ESRCH)?;
        self.pid = None;
        let status = reap_status(pidfd.as_fd())?;
        self.exit_status = Some(status);
        Ok(status)
    }

    /// Idempotent teardown: force-stops a running process (including the
    /// stop string) and releases both channels and the log.
    pub(crate) fn cleanup(&mut self, global_stop: Option<&str>, grace: Duration) {
        if self.destroyed {
            return;
        }
        if self.is_running() {
            self.send_stop_string(global_stop);
            if let Err(e) = self.terminate(grace) {
                warn!(command = %self.name, error = %e, "terminate during cleanup failed");
            }
        }
        self.process.cleanup();
        self.client.cleanup();
        self.log = None;
        self.destroyed = true;
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

/// Maps a reaped wait status onto a single exit code.
fn reap_status(pidfd: BorrowedFd<'_>) -> Result<i32, Errno> {
    match waitid(Id::PIDFd(pidfd), WaitPidFlag::WEXITED)? {
        WaitStatus::Exited(_, code) => Ok(code),
        WaitStatus::Signaled(_, sig, _) => Ok(128 + sig as i32),
        other => {
            warn!(?other, "unexpected wait status");
            Ok(-1)
        }
    }
}

/// Opens a non-blocking, close-on-exec pidfd for the given process.
fn pidfd_open(pid: i32) -> io::Result<OwnedFd> {
    // PIDFD_NONBLOCK has the same value as O_NONBLOCK.
    let flags = libc::O_NONBLOCK as libc::c_uint;
    let ret = unsafe { libc::syscall(libc::SYS_pidfd_open, pid as libc::pid_t, flags) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(ret as RawFd) };
    fcntl(fd.as_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(io::Error::from)?;
    Ok(fd)
}

/// Child-side setup between fork and exec: fresh signal mask, new session,
/// the slave device as controlling terminal and stdio, optional raw mode,
/// then the start-delay sleep.
fn child_setup(slave_path: &CString, raw: bool, start_delay: Duration) -> io::Result<()> {
    unsafe {
        // The parent blocks termination signals for its signalfd; the
        // command must not inherit that mask.
        let mut empty: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut empty);
        libc::sigprocmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());

        if libc::setsid() == -1 {
            return Err(io::Error::last_os_error());
        }

        // A fresh open rather than the inherited descriptor: this is the
        // open the client-side watch counts, and a session leader can only
        // acquire a controlling terminal it opened itself.
        let fd = libc::open(slave_path.as_ptr(), libc::O_RDWR);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::ioctl(fd, libc::TIOCSCTTY, 0) == -1 {
            return Err(io::Error::last_os_error());
        }
        for std_fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            if libc::dup2(fd, std_fd) == -1 {
                return Err(io::Error::last_os_error());
            }
        }
        if fd > libc::STDERR_FILENO {
            libc::close(fd);
        }

        if raw {
            let mut attrs: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(libc::STDIN_FILENO, &mut attrs) == -1 {
                return Err(io::Error::last_os_error());
            }
            libc::cfmakeraw(&mut attrs);
            if libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &attrs) == -1 {
                return Err(io::Error::last_os_error());
            }
        }
    }

    if !start_delay.is_zero() {
        std::thread::sleep(start_delay);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::default()
    }

    fn spec_in(dir: &std::path::Path, name: &str, cmdline: &str) -> CommandSpec {
        CommandSpec::new(name, cmdline).with_link(dir.join(name))
    }

    #[test]
    fn test_create_does_not_spawn() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_config();
        let cmd =
            Command::create(&spec_in(dir.path(), "idle", "cat"), &cfg).expect("create");
        assert!(!cmd.is_running());
        assert_eq!(cmd.pid(), None);
        assert_eq!(cmd.exit_status, None);
    }

    #[test]
    fn test_link_collision_fails_before_process_channel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_config();
        let link = dir.path().join("dup");
        std::fs::write(&link, b"taken").expect("occupy");

        let err = Command::create(&spec_in(dir.path(), "dup", "cat"), &cfg)
            .expect_err("collision");
        assert!(matches!(err, SetupError::LinkExists { .. }));
    }

    #[test]
    fn test_start_stop_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_config();
        let mut cmd =
            Command::create(&spec_in(dir.path(), "cat", "cat"), &cfg).expect("create");

        cmd.start(true, Duration::ZERO).expect("start");
        assert!(cmd.is_running());
        assert!(cmd.pid().is_some());
        assert!(cmd.pidfd_raw().is_some());

        // Starting again is refused while running.
        assert!(matches!(
            cmd.start(true, Duration::ZERO),
            Err(SetupError::AlreadyRunning { .. })
        ));

        let status = cmd.terminate(Duration::from_millis(100)).expect("terminate");
        assert!(!cmd.is_running());
        assert_eq!(cmd.exit_status, Some(status));
        // cat dies from SIGTERM.
        assert_eq!(status, 128 + Signal::SIGTERM as i32);
    }

    #[test]
    fn test_sigterm_immune_process_is_killed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_config();
        let mut cmd = Command::create(
            &spec_in(dir.path(), "stubborn", "trap '' TERM; while :; do sleep 1; done"),
            &cfg,
        )
        .expect("create");

        cmd.start(true, Duration::ZERO).expect("start");
        // Give the shell a moment to install the trap.
        std::thread::sleep(Duration::from_millis(200));

        let status = cmd.terminate(Duration::from_millis(100)).expect("terminate");
        assert!(!cmd.is_running());
        assert_eq!(status, 128 + Signal::SIGKILL as i32);
    }

    #[test]
    fn test_stop_string_sends_newline_then_paced_characters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_config();
        let spec = CommandSpec::new("q", "cat")
            .with_link(dir.path().join("q"))
            .with_delay(Duration::from_millis(50))
            .with_stop_string("quit");
        let mut cmd = Command::create(&spec, &cfg).expect("create");

        // Stand in for the command process on the slave side, and make sure
        // the open has been accounted before writing.
        let slave = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(cmd.process.path())
            .expect("open slave");
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while cmd.process.opens() == 0 {
            assert!(std::time::Instant::now() < deadline, "open not accounted");
            let _ = cmd.process.drain_notify().expect("drain");
            std::thread::sleep(Duration::from_millis(10));
        }

        // The per-command string wins over the global one.
        let started = std::time::Instant::now();
        cmd.send_stop_string(Some("global-ignored"));
        let elapsed = started.elapsed();

        let mut reader = slave;
        let mut buf = [0u8; 5];
        use std::io::Read as _;
        reader.read_exact(&mut buf).expect("slave read");
        assert_eq!(&buf, b"\nquit");
        // Four characters, each followed by the 50ms inter-byte delay.
        assert!(elapsed >= Duration::from_millis(150), "not paced: {elapsed:?}");
    }

    #[test]
    fn test_cleanup_is_idempotent_and_kills() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_config();
        let link = dir.path().join("loop");
        let spec = CommandSpec::new("loop", "sleep 600").with_link(&link);
        let mut cmd = Command::create(&spec, &cfg).expect("create");
        cmd.start(true, Duration::ZERO).expect("start");
        let pid = cmd.pid().expect("pid");

        cmd.cleanup(None, Duration::from_millis(100));
        assert!(cmd.is_destroyed());
        assert!(!cmd.is_running());
        assert!(std::fs::symlink_metadata(&link).is_err());
        // The process is gone.
        assert!(kill(Pid::from_raw(pid), None).is_err());

        // Second cleanup is a no-op.
        cmd.cleanup(None, Duration::from_millis(100));
        assert!(cmd.is_destroyed());
    }
}
