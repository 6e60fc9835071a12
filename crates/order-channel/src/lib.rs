//! Durable publish/subscribe channel for order events.
//!
//! Every publish fans out one [`Delivery`] per interested subscriber. The
//! delivery is persisted before it is handed to the subscriber's queue and is
//! deleted only when the handler acknowledges it, so a crash between hand-off
//! and acknowledgement leads to redelivery after [`EventChannel::recover`].
//! Handlers therefore see every event at least once and must be idempotent.
//!
//! A failing delivery is retried according to its [`RedeliveryPolicy`] and is
//! finally parked in the dead-letter area rather than dropped.

mod channel;
mod consumer;
mod dead_letter;
mod records;

pub use channel::EventChannel;
pub use consumer::Consumer;
pub use dead_letter::DeadLetters;
pub use records::{DeadLetter, Delivery, RedeliveryPolicy};

use async_trait::async_trait;
use order_types::OrderEvent;
use thiserror::Error;
use uuid::Uuid;

/// Identifier assigned to a published message.
pub type MessageId = Uuid;

/// Errors that can occur during channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
	/// The channel could not accept the message. Publishing may be retried.
	#[error("Channel unavailable: {0}")]
	Unavailable(String),
	/// A subscriber with this name is already registered.
	#[error("Subscriber already registered: {0}")]
	DuplicateSubscriber(String),
	#[error("Dead letter not found: {0}")]
	DeadLetterNotFound(Uuid),
	#[error("Storage error: {0}")]
	Storage(String),
}

/// Failure reported by an event handler. The delivery is retried.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerFault(pub String);

impl HandlerFault {
	pub fn new(message: impl ToString) -> Self {
		Self(message.to_string())
	}
}

/// Consumer side of a subscription.
#[async_trait]
pub trait EventHandler: Send + Sync {
	/// Handles one delivery. Returning `Ok` acknowledges it.
	async fn handle(&self, event: OrderEvent) -> Result<(), HandlerFault>;
}

/// Producer side of the channel.
#[async_trait]
pub trait EventPublisher: Send + Sync {
	/// Durably accepts `event` for every interested subscriber.
	async fn publish(&self, event: OrderEvent) -> Result<MessageId, ChannelError>;
}
