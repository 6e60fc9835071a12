//! Event handlers subscribed to the order channel.
//!
//! The processing handler consumes `OrderCreated`; the notification recorder
//! consumes `OrderCompleted` and `OrderExpired`.

pub mod notification;
pub mod processing;

pub use notification::{NotificationRecorder, RecordOutcome, RecorderError};
pub use processing::{ProcessingError, ProcessingHandler, ProcessingOutcome};
