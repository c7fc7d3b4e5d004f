//! # Global runtime configuration.
//!
//! Provides [`Config`], the centralized settings for the supervisor runtime.
//! The configuration is constructed once and owned by the
//! [`Supervisor`](crate::Supervisor); there is no process-wide mutable state.
//!
//! ## Field semantics
//! - `broadcast_link`: filesystem path published for the shared broadcast
//!   terminal (every command's output fans into it, input fans out of it)
//! - `default_delay`: inter-byte write delay inherited by commands whose
//!   specification leaves the delay field empty (`0s` = unpaced)
//! - `restart` / `stop`: policies applied to every command (see
//!   [`RestartPolicy`], [`StopPolicy`])
//! - `line_buffered` / `prefix_broadcast` / `broadcast_enabled`: broadcast
//!   mirroring behavior; all three can be toggled at runtime through the
//!   supervisor
//! - `exit_on_idle`: commands delete themselves on exit, and the supervisor
//!   loop ends once the registry empties
//! - `raw_mode`: published terminals and spawned commands use raw
//!   (uncooked) terminal mode

use std::path::PathBuf;
use std::time::Duration;

use crate::policies::{RestartPolicy, StopPolicy};

/// Size in bytes of the per-command output ring buffer.
///
/// Also the maximum length of a line that can be broadcast without overflow.
pub const RING_CAPACITY: usize = 4096;

/// Global configuration for the supervisor runtime.
#[derive(Clone, Debug)]
pub struct Config {
    /// Path of the symlink published for the broadcast terminal.
    pub broadcast_link: PathBuf,

    /// Default inter-byte write delay for commands that do not set one.
    ///
    /// `Duration::ZERO` means writes are not paced.
    pub default_delay: Duration,

    /// Restart behavior applied when a command process exits.
    pub restart: RestartPolicy,

    /// Stop behavior: optional stop string and the SIGTERM grace window.
    pub stop: StopPolicy,

    /// Line-buffer command output toward the broadcast terminal.
    ///
    /// When `false`, every output byte is mirrored immediately and lines from
    /// different commands may interleave.
    pub line_buffered: bool,

    /// Prefix each line-buffered broadcast line with `"<name>: "`.
    ///
    /// Only meaningful when `line_buffered` is set.
    pub prefix_broadcast: bool,

    /// Master switch for mirroring command output to the broadcast terminal.
    pub broadcast_enabled: bool,

    /// Delete commands when they exit and stop the supervisor once the
    /// registry is empty.
    pub exit_on_idle: bool,

    /// Put published terminals and spawned commands into raw mode.
    pub raw_mode: bool,
}

impl Config {
    /// Returns the effective write delay for a specification that may omit it.
    #[inline]
    pub fn delay_or_default(&self, delay: Option<Duration>) -> Duration {
        delay.unwrap_or(self.default_delay)
    }

    /// Returns the global stop string, if one is configured.
    #[inline]
    pub fn stop_string(&self) -> Option<&str> {
        self.stop.stop_string.as_deref()
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `broadcast_link = "btty"`
    /// - `default_delay = 0s` (unpaced writes)
    /// - `restart = RestartPolicy::default()` (enabled, 1s/5s delays)
    /// - `stop = StopPolicy::default()` (no stop string, 100ms grace)
    /// - `line_buffered = false`, `prefix_broadcast = false`
    /// - `broadcast_enabled = true`
    /// - `exit_on_idle = false`
    /// - `raw_mode = true`
    fn default() -> Self {
        Self {
            broadcast_link: PathBuf::from("btty"),
            default_delay: Duration::ZERO,
            restart: RestartPolicy::default(),
            stop: StopPolicy::default(),
            line_buffered: false,
            prefix_broadcast: false,
            broadcast_enabled: true,
            exit_on_idle: false,
            raw_mode: true,
        }
    }
}
