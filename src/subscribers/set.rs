//! # Panic-isolated event fan-out to multiple subscribers.
//!
//! Provides [`SubscriberSet`] — delivers each event to every subscriber in
//! registration order, directly on the dispatcher thread.
//!
//! ## Rules
//! - **Ordering**: every subscriber sees every event, in `seq` order.
//! - **Isolation**: a panicking subscriber does not crash the supervisor or
//!   affect other subscribers.
//!
//! ## Panic handling
//! Delivery uses `catch_unwind` to isolate panics:
//! - the panic is caught and converted to a `SubscriberPanicked` event, which
//!   is delivered to the remaining subscribers,
//! - `SubscriberPanicked` events themselves are not re-reported if a
//!   subscriber panics while handling one.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::events::Event;
use crate::subscribers::Subscribe;

/// Fan-out coordinator for event subscribers.
pub struct SubscriberSet {
    subs: Vec<Arc<dyn Subscribe>>,
}

impl SubscriberSet {
    /// Creates a new set from the given subscribers.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        Self { subs }
    }

    /// Returns true if the set has no subscribers.
    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Delivers an event to all subscribers.
    ///
    /// Panics in individual subscribers are caught, logged, and reported as
    /// [`Event::subscriber_panicked`] to the rest of the set.
    pub fn emit(&self, event: &Event) {
        let mut panics: Vec<Event> = Vec::new();

        for sub in &self.subs {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| sub.on_event(event))) {
                let info = panic_message(payload.as_ref());
                warn!(subscriber = sub.name(), %info, "subscriber panicked");
                if !event.is_subscriber_panic() {
                    panics.push(Event::subscriber_panicked(sub.name(), info));
                }
            }
        }

        for panic_event in panics {
            self.emit(&panic_event);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl Subscribe for Counter {
        fn on_event(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
        fn name(&self) -> &'static str {
            "counter"
        }
    }

    struct Bomb;

    impl Subscribe for Bomb {
        fn on_event(&self, event: &Event) {
            if !event.is_subscriber_panic() {
                panic!("boom");
            }
        }
        fn name(&self) -> &'static str {
            "bomb"
        }
    }

    #[test]
    fn test_panicking_subscriber_does_not_stop_delivery() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(Bomb), counter.clone()];
        let set = SubscriberSet::new(subs);

        set.emit(&Event::new(EventKind::CommandAdded).with_name("a"));

        // The counter sees the original event plus the panic report.
        assert_eq!(counter.0.load(Ordering::Relaxed), 2);
    }
}
