//! In-process notification bus and the shared event vocabulary.
//!
//! [`NotificationBus`] gives producers decoupled synchronous fan-out with
//! subscriber priorities, once-subscriptions, wildcard listeners, and a
//! bounded introspection history. The [`topics`] and [`events`] modules hold
//! the product-wide topic constants and typed payloads. One bus per context;
//! contexts never share a bus.

mod bus;
mod error;
pub mod events;
pub mod topics;

pub use bus::{
    Notification, NotificationBus, SubscribeOptions, Subscription, DEFAULT_HISTORY_CAPACITY,
    WILDCARD,
};
pub use error::BusError;
