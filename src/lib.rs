//! # ptyherd
//!
//! **ptyherd** is a process-relay supervisor: it launches a set of named,
//! long-running shell commands, keeps exactly one instance of each alive for
//! as long as anyone is listening to it, and relays bytes between external
//! clients and each command through a private pseudo-terminal. Optionally it
//! fans input and output out through a single broadcast terminal shared by
//! all commands — useful for driving N parallel sessions (say, N concurrent
//! SSH connections) as if they were one.
//!
//! ## Architecture
//! ```text
//!            ┌────────────┐  ┌────────────┐  ┌────────────┐
//!            │ CommandSpec│  │ CommandSpec│  │ CommandSpec│
//!            └─────┬──────┘  └─────┬──────┘  └─────┬──────┘
//!                  ▼               ▼               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Supervisor (single-threaded event loop)                     │
//! │  - Dispatcher (readiness wait set: the only scheduler)       │
//! │  - Registry (name → Command, slowest-command pacing)         │
//! │  - broadcast Channel (shared fan-in/fan-out terminal)        │
//! │  - SubscriberSet (lifecycle events → subscribers)            │
//! └───┬──────────────────┬──────────────────┬────────────────────┘
//!     ▼                  ▼                  ▼
//! ┌──────────┐      ┌──────────┐      ┌──────────┐
//! │ Command  │      │ Command  │      │ Command  │   each owns:
//! │ (process)│      │ (process)│      │ (process)│   - process Channel
//! └────┬─────┘      └────┬─────┘      └────┬─────┘   - client Channel
//!      │ pty              │ pty             │ pty     - OutputRing
//!      ▼                  ▼                 ▼
//!   clients open the published links (one per command + one broadcast)
//! ```
//!
//! Every [`Channel`](crate::channel) is a pseudo-terminal pair: the
//! supervisor relays bytes through the master ("hub") side while commands
//! and clients sit on the slave side, whose device path is published as a
//! symlink. Open/close accounting via inotify drives lazy starts (first
//! client open spawns the process) and automatic stops (last close brings it
//! down, unless the broadcast terminal is still being watched).
//!
//! ## Lifecycle
//! ```text
//! add(spec) ──► create channels ──► spawn ──► running
//!    exit ──► delete-on-exit? ──► removed (idle exit when registry empties)
//!         └──► restart enabled? ──► respawn after status-keyed delay
//!                                   (1s clean / 5s failed by default)
//! stop ──► stop string (paced) ──► SIGTERM ──► grace ──► SIGKILL ──► reaped
//! ```
//!
//! ## Concurrency model
//! One OS thread, cooperative dispatch: handlers run to completion, and the
//! dispatcher's wait is the only suspension point. Supervised commands are
//! separate OS processes; the supervisor shares nothing with them but byte
//! streams. The graceful-stop sequence deliberately blocks the loop (stop
//! strings are paced character by character, and the SIGTERM→SIGKILL
//! escalation waits synchronously); simplicity is chosen over stop latency.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use ptyherd::{CommandSpec, Config, LogWriter, Supervisor};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.line_buffered = true;
//!     cfg.prefix_broadcast = true;
//!
//!     let mut sup = Supervisor::new(cfg, vec![Arc::new(LogWriter)])?;
//!     sup.add(CommandSpec::new("a", "ssh host-a"))?;
//!     sup.add(CommandSpec::new("b", "ssh host-b"))?;
//!
//!     // Drive everything until SIGINT/SIGTERM.
//!     sup.run()?;
//!     Ok(())
//! }
//! ```

mod channel;
mod command;
mod config;
mod core;
mod error;
mod events;
mod policies;
mod subscribers;

// ---- Public re-exports ----

pub use channel::{Channel, DiscardTrace, NotifyEvent, OutputRing, ReadOutcome};
pub use command::CommandSpec;
pub use config::{Config, RING_CAPACITY};
pub use core::{CommandListing, StopOutcome, Supervisor, WakeHandle};
pub use error::{ChannelError, DispatchError, RuntimeError, SetupError, SpecError};
pub use events::{Event, EventKind};
pub use policies::{RestartPolicy, RestartSource, StopPolicy};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
