//! Error types used by the ptyherd runtime.
//!
//! The fault taxonomy follows the supervisor's error-handling contract:
//!
//! - [`SetupError`] — resource-acquisition failures while creating channels or
//!   commands. Reported to the caller and fully unwound; never fatal to the
//!   rest of the registry.
//! - [`SpecError`] — a malformed command specification string.
//! - [`ChannelError`] — relay-time channel faults. The only retryable case is
//!   [`ChannelError::WouldBlock`] (back-pressure from a full terminal buffer
//!   with an active reader); see [`ChannelError::is_retryable`].
//! - [`DispatchError`] — wait-set failures. These indicate the event model
//!   itself is broken and are fatal to the whole supervisor.
//! - [`RuntimeError`] — top-level errors returned by the supervisor.
//!
//! Each enum provides `as_label()` for stable snake_case labels in logs.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while acquiring OS resources for a channel or command.
///
/// Setup errors are non-fatal to the supervisor: the offending command is
/// simply absent and every partially acquired resource has been released
/// before the error is returned.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SetupError {
    /// The requested published link path already exists on disk.
    #[error("link path {path:?} already exists")]
    LinkExists {
        /// The colliding path.
        path: PathBuf,
    },

    /// Opening the pseudo-terminal pair failed.
    #[error("failed to open pseudo-terminal pair")]
    OpenPty(#[source] nix::Error),

    /// Switching the held terminal endpoint into raw mode failed.
    #[error("failed to configure terminal attributes")]
    Terminal(#[source] nix::Error),

    /// Publishing the symlink to the terminal device failed.
    #[error("failed to publish link {path:?}")]
    PublishLink {
        /// The link path that could not be created.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Establishing the open/close notification watch failed.
    #[error("failed to watch terminal path for open/close events")]
    Watch(#[source] nix::Error),

    /// Opening a per-command output log failed.
    #[error("failed to open log file {path:?}")]
    Log {
        /// The log path from the command specification.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Spawning the command process failed.
    #[error("failed to spawn command process")]
    Spawn(#[source] std::io::Error),

    /// Acquiring the process-exit notification handle failed.
    #[error("failed to obtain process-exit handle for pid {pid}")]
    ProcessHandle {
        /// Pid of the spawned process.
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    /// A command with this name is already registered.
    #[error("command name {name:?} is already in use")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// `start` was called on a command that is already running.
    #[error("command {name:?} is already running")]
    AlreadyRunning {
        /// The command name.
        name: String,
    },
}

impl SetupError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SetupError::LinkExists { .. } => "setup_link_exists",
            SetupError::OpenPty(_) => "setup_open_pty",
            SetupError::Terminal(_) => "setup_terminal",
            SetupError::PublishLink { .. } => "setup_publish_link",
            SetupError::Watch(_) => "setup_watch",
            SetupError::Log { .. } => "setup_log",
            SetupError::Spawn(_) => "setup_spawn",
            SetupError::ProcessHandle { .. } => "setup_process_handle",
            SetupError::DuplicateName { .. } => "setup_duplicate_name",
            SetupError::AlreadyRunning { .. } => "setup_already_running",
        }
    }
}

/// Errors raised while parsing a `name,link,log,delay,cmdline` specification.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SpecError {
    /// The specification has fewer than five comma-separated fields.
    #[error("specification is missing the {field} field")]
    MissingField {
        /// Name of the first missing field.
        field: &'static str,
    },

    /// The name field is empty.
    #[error("command name must not be empty")]
    EmptyName,

    /// The command line field is empty.
    #[error("command line must not be empty")]
    EmptyCommandLine,

    /// The delay field is not a valid non-negative number of seconds.
    #[error("bad delay value {value:?}")]
    BadDelay {
        /// The offending delay text.
        value: String,
    },
}

/// Errors raised by channel reads and writes at relay time.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The terminal buffer is full and a reader exists.
    ///
    /// This is back-pressure, not failure: the caller must retry later.
    #[error("channel write would block (terminal buffer full)")]
    WouldBlock,

    /// A hard I/O error on the channel's hub descriptor.
    #[error("channel I/O failed")]
    Io(#[source] nix::Error),

    /// The channel has already been cleaned up.
    #[error("channel is closed")]
    Closed,
}

impl ChannelError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ChannelError::WouldBlock => "channel_would_block",
            ChannelError::Io(_) => "channel_io",
            ChannelError::Closed => "channel_closed",
        }
    }

    /// Indicates whether the error is safe to retry.
    ///
    /// Only [`ChannelError::WouldBlock`] is retryable; it signals
    /// back-pressure from a full terminal buffer, not a fault.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::WouldBlock)
    }
}

/// Errors raised by the event dispatcher.
///
/// Any failure to create, register with, or wait on the readiness set means
/// the event model itself is broken; these are fatal to the supervisor.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Creating the wait set failed.
    #[error("failed to create readiness wait set")]
    Create(#[source] std::io::Error),

    /// Registering a descriptor failed.
    #[error("failed to register descriptor {fd} with the wait set")]
    Register {
        /// Raw descriptor that could not be registered.
        fd: i32,
        #[source]
        source: std::io::Error,
    },

    /// Deregistering a descriptor failed.
    #[error("failed to deregister descriptor {fd} from the wait set")]
    Deregister {
        /// Raw descriptor that could not be deregistered.
        fd: i32,
        #[source]
        source: std::io::Error,
    },

    /// The blocking wait itself failed.
    #[error("readiness wait failed")]
    Wait(#[source] std::io::Error),

    /// Creating or firing the loop waker failed.
    #[error("wait-set waker failed")]
    Waker(#[source] std::io::Error),
}

/// Top-level errors returned by [`Supervisor`](crate::Supervisor).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The event dispatcher failed; the supervisor cannot continue.
    #[error("event dispatcher failed")]
    Dispatch(#[from] DispatchError),

    /// Setting up the supervisor's own resources (broadcast channel) failed.
    #[error("supervisor setup failed")]
    Setup(#[from] SetupError),

    /// Installing the termination-signal source failed.
    #[error("failed to install signal handling")]
    Signals(#[source] nix::Error),

    /// Reaping a supervised process failed.
    #[error("failed to reap command {name:?}")]
    Reap {
        /// The command whose exit could not be collected.
        name: String,
        #[source]
        source: nix::Error,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Dispatch(_) => "runtime_dispatch",
            RuntimeError::Setup(_) => "runtime_setup",
            RuntimeError::Signals(_) => "runtime_signals",
            RuntimeError::Reap { .. } => "runtime_reap",
        }
    }
}
