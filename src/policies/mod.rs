//! Restart and stop policies.
//!
//! This module groups the knobs that control **if/when** an exited command is
//! restarted and **how** a running command is brought down.
//!
//! ## Contents
//! - [`RestartPolicy`] whether exits trigger a respawn and how long to wait,
//!   keyed by exit status (clean exits restart sooner than failures)
//! - [`StopPolicy`] the optional stop string sent before signalling and the
//!   grace window between SIGTERM and SIGKILL
//!
//! ## Defaults
//! - `RestartPolicy::default()` → enabled, success delay 1s, failure delay 5s.
//! - `StopPolicy::default()` → no stop string, 100ms grace.

mod restart;
mod stop;

pub use restart::{RestartPolicy, RestartSource};
pub use stop::StopPolicy;
