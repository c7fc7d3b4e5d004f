//! # Simple logging subscriber for debugging and demos.
//!
//! [`LogWriter`] prints events to stderr in a human-readable format.
//!
//! ## Output format
//! ```text
//! [added] command=a
//! [started] command=a pid=4242 restarts=0
//! [client-open] command=a opens=1
//! [exited] command=a status=1
//! [restart] command=a delay=5s source=failure restarts=1
//! [stopped] command=a status=0
//! [overflow] command=a
//! [shutdown-requested] reason=signal
//! ```

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Simple stderr logging subscriber.
///
/// Prints one line per event for debugging and demonstration purposes. For
/// structured output, implement a custom [`Subscribe`] instead.
pub struct LogWriter;

impl Subscribe for LogWriter {
    fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::CommandAdded => {
                eprintln!("[added] command={:?}", e.name.as_deref().unwrap_or("?"));
            }
            EventKind::CommandStarted => {
                eprintln!(
                    "[started] command={:?} pid={:?} restarts={:?}",
                    e.name, e.pid, e.restarts
                );
            }
            EventKind::CommandExited => {
                eprintln!("[exited] command={:?} status={:?}", e.name, e.status);
            }
            EventKind::RestartScheduled => {
                eprintln!(
                    "[restart] command={:?} delay_ms={:?} source={:?} restarts={:?}",
                    e.name, e.delay_ms, e.source, e.restarts
                );
            }
            EventKind::CommandStopped => {
                eprintln!(
                    "[stopped] command={:?} status={:?} reason={:?}",
                    e.name, e.status, e.reason
                );
            }
            EventKind::CommandRemoved => {
                eprintln!("[removed] command={:?}", e.name);
            }
            EventKind::StartFailed => {
                eprintln!("[start-failed] command={:?} reason={:?}", e.name, e.reason);
            }
            EventKind::ClientOpened => {
                eprintln!("[client-open] command={:?} opens={:?}", e.name, e.opens);
            }
            EventKind::ClientClosed => {
                eprintln!("[client-close] command={:?} opens={:?}", e.name, e.opens);
            }
            EventKind::BroadcastOpened => {
                eprintln!("[broadcast-open] opens={:?}", e.opens);
            }
            EventKind::BroadcastClosed => {
                eprintln!("[broadcast-close] opens={:?}", e.opens);
            }
            EventKind::LineOverflowed => {
                eprintln!("[overflow] command={:?}", e.name);
            }
            EventKind::ShutdownRequested => {
                eprintln!("[shutdown-requested] reason={:?}", e.reason);
            }
            EventKind::IdleExit => {
                eprintln!("[idle-exit]");
            }
            EventKind::SubscriberPanicked => {
                eprintln!(
                    "[subscriber-panicked] subscriber={:?} reason={:?}",
                    e.name, e.reason
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}
