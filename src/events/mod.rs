//! Runtime events: the lifecycle observability data model.
//!
//! This module defines the event **data model** emitted by the supervisor,
//! registry and command handlers. Events are delivered synchronously to the
//! [`SubscriberSet`](crate::subscribers::SubscriberSet) from the dispatcher
//! thread; there is no queueing layer because all publishers live on the
//! single loop thread.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor` handlers (command lifecycle, client
//!   open/close accounting, broadcast state, shutdown).
//! - **Consumers**: subscribers registered at supervisor construction
//!   (e.g. [`LogWriter`](crate::subscribers::LogWriter)).

mod event;

pub use event::{Event, EventKind};
