//! Runtime core: the wait set and the supervisor built on it.
//!
//! The public API from this module is [`Supervisor`], plus the small types a
//! control surface needs ([`StopOutcome`], [`WakeHandle`],
//! [`CommandListing`]).
//!
//! Internal modules:
//! - [`dispatcher`]: the single-threaded readiness wait set mapping fired
//!   descriptors back to their bindings;
//! - [`registry`]: the name-keyed collection of live commands;
//! - [`supervisor`]: all event handlers and the collaborator-facing
//!   operations.

mod dispatcher;
mod registry;
mod supervisor;

pub use dispatcher::WakeHandle;
pub use registry::CommandListing;
pub use supervisor::{StopOutcome, Supervisor};
