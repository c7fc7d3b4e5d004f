//! # Stop policy for supervised commands.
//!
//! [`StopPolicy`] bundles the two knobs of the stop sequence:
//!
//! - `stop_string`: a command-specific quit sequence (e.g. `exit` or `~.`)
//!   written to the process before any signal is sent. A leading newline is
//!   always transmitted first, then the string one character at a time with
//!   the command's inter-byte delay between characters. Commands may carry
//!   their own stop string, which takes precedence over this global one.
//! - `grace`: how long to wait after SIGTERM for the exit notification
//!   before escalating to SIGKILL. The escalation loop retries until the
//!   child is actually reaped; the supervisor never abandons a zombie.
//!
//! The whole stop sequence runs synchronously on the supervisor thread and
//! blocks the event loop for its duration.

use std::time::Duration;

/// Policy controlling how running commands are brought down.
#[derive(Clone, Debug, Default)]
pub struct StopPolicy {
    /// Quit sequence sent to the process before signalling, if any.
    pub stop_string: Option<String>,
    /// Wait after SIGTERM before escalating to SIGKILL.
    ///
    /// `Duration::ZERO` falls back to [`StopPolicy::DEFAULT_GRACE`].
    pub grace: Duration,
}

impl StopPolicy {
    /// Default SIGTERM-to-SIGKILL grace window.
    pub const DEFAULT_GRACE: Duration = Duration::from_millis(100);

    /// Returns the effective grace window, substituting the default for zero.
    pub fn effective_grace(&self) -> Duration {
        if self.grace.is_zero() {
            Self::DEFAULT_GRACE
        } else {
            self.grace
        }
    }
}
