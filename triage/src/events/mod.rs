//! Notification fan-out
//!
//! Pub/sub over tokio channels. `publish` never blocks and gives no
//! delivery guarantee beyond at-most-once per subscriber per event.

pub mod bus;
pub mod types;

pub use bus::{
    Delivery, EventBusError, EventBusResult, EventFilter, FilteredReceiver, NotificationBus,
    NotificationBusExt, PublishReport, SharedNotificationBus, Subscription,
    DEFAULT_SUBSCRIBER_BUFFER,
};
pub(crate) use bus::risk_changed;
pub use types::{SessionEndReason, TriageEvent};
