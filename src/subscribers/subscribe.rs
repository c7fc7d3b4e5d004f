//! # Core subscriber trait.
//!
//! `Subscribe` is the extension point for plugging custom event handlers into
//! the runtime. Subscribers are invoked synchronously from the dispatcher
//! thread, in registration order, for every published event.
//!
//! ## Contract
//! - Handlers run on the supervisor's single loop thread: a slow subscriber
//!   delays relay progress exactly like any other handler. Keep handlers
//!   short; offload heavy work to your own thread if needed.
//! - Panics are caught by the [`SubscriberSet`](crate::subscribers::SubscriberSet)
//!   and reported as `SubscriberPanicked` events; other subscribers are
//!   unaffected.

use crate::events::Event;

/// Contract for event subscribers.
pub trait Subscribe: Send + Sync + 'static {
    /// Handles a single event.
    ///
    /// # Parameters
    /// - `event`: Reference to the event (does not transfer ownership)
    fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
