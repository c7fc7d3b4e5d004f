//! # Restart policy for supervised commands.
//!
//! [`RestartPolicy`] decides whether an exited command is respawned and how
//! long the respawn is delayed. The delay is keyed by the exit status: a
//! clean exit (status 0) uses the shorter `success_delay`, anything else uses
//! the longer `failure_delay`, throttling restart storms from commands that
//! die immediately.
//!
//! The delay is served *inside the child* between fork and exec, so a pending
//! restart never blocks the supervisor loop.
//!
//! Restart applies only when both the global policy is enabled **and** the
//! individual command has its restart flag set.

use std::time::Duration;

/// Why a restart delay was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartSource {
    /// The command exited with status 0.
    Success,
    /// The command exited with a non-zero status (or was killed by a signal).
    Failure,
}

/// Policy controlling whether and when exited commands are respawned.
#[derive(Clone, Copy, Debug)]
pub struct RestartPolicy {
    /// Global restart switch. Individual commands can still opt out.
    pub enabled: bool,
    /// Respawn delay after a clean exit (status 0).
    pub success_delay: Duration,
    /// Respawn delay after a failed exit (any non-zero status).
    pub failure_delay: Duration,
}

impl RestartPolicy {
    /// Returns the respawn delay for the given exit status.
    pub fn delay_for(&self, status: i32) -> Duration {
        match self.source_for(status) {
            RestartSource::Success => self.success_delay,
            RestartSource::Failure => self.failure_delay,
        }
    }

    /// Classifies an exit status as success or failure.
    pub fn source_for(&self, status: i32) -> RestartSource {
        if status == 0 {
            RestartSource::Success
        } else {
            RestartSource::Failure
        }
    }
}

impl Default for RestartPolicy {
    /// Returns a policy with restarts enabled, `success_delay = 1s` and
    /// `failure_delay = 5s`.
    fn default() -> Self {
        Self {
            enabled: true,
            success_delay: Duration::from_secs(1),
            failure_delay: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_status_selects_success_delay() {
        let policy = RestartPolicy {
            enabled: true,
            success_delay: Duration::from_millis(250),
            failure_delay: Duration::from_secs(3),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.source_for(0), RestartSource::Success);
    }

    #[test]
    fn test_any_nonzero_status_selects_failure_delay() {
        let policy = RestartPolicy {
            enabled: true,
            success_delay: Duration::from_millis(250),
            failure_delay: Duration::from_secs(3),
        };
        for status in [1, 2, 127, 128 + 9, -1] {
            assert_eq!(
                policy.delay_for(status),
                Duration::from_secs(3),
                "status {} should use the failure delay",
                status
            );
            assert_eq!(policy.source_for(status), RestartSource::Failure);
        }
    }
}
