//! Publishing events after a unit of work has committed.
//!
//! The committed state is authoritative: a failed publish never rolls it back.
//! [`PostCommitPublisher`] retries a transiently unavailable channel with
//! exponential backoff for a bounded time and then parks the event in the
//! dead-letter area, where it can be inspected and replayed.

use backoff::ExponentialBackoffBuilder;
use order_channel::{ChannelError, DeadLetter, DeadLetters, EventPublisher, MessageId};
use order_types::{truncate_id, OrderEvent};
use std::sync::Arc;
use std::time::Duration;

/// What happened to an event after its unit of work committed.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishReceipt {
	/// The channel accepted the event.
	Delivered(MessageId),
	/// The channel stayed unavailable; the event is in the dead-letter area.
	Parked { reason: String },
	/// Neither publishing nor parking succeeded. Only the log records the event.
	Lost { reason: String },
}

impl PublishReceipt {
	pub fn is_delivered(&self) -> bool {
		matches!(self, PublishReceipt::Delivered(_))
	}
}

pub struct PostCommitPublisher {
	channel: Arc<dyn EventPublisher>,
	dead_letters: DeadLetters,
	max_elapsed: Duration,
}

impl PostCommitPublisher {
	pub fn new(
		channel: Arc<dyn EventPublisher>,
		dead_letters: DeadLetters,
		max_elapsed: Duration,
	) -> Self {
		Self {
			channel,
			dead_letters,
			max_elapsed,
		}
	}

	/// Publishes `event`. Must be called after the unit of work that produced
	/// it has committed, never while one is open.
	pub async fn publish(&self, event: OrderEvent) -> PublishReceipt {
		let policy = ExponentialBackoffBuilder::new()
			.with_initial_interval(Duration::from_millis(50))
			.with_max_interval(Duration::from_secs(5))
			.with_max_elapsed_time(Some(self.max_elapsed))
			.build();

		let attempt = || async {
			self.channel.publish(event).await.map_err(|e| match e {
				ChannelError::Unavailable(_) => {
					tracing::debug!(error = %e, "Channel unavailable; retrying publish");
					backoff::Error::transient(e)
				},
				other => backoff::Error::permanent(other),
			})
		};

		let error = match backoff::future::retry(policy, attempt).await {
			Ok(message_id) => return PublishReceipt::Delivered(message_id),
			Err(e) => e,
		};

		let reason = error.to_string();
		tracing::warn!(
			order_id = %truncate_id(&event.order_id().to_string()),
			event = %event.kind(),
			error = %reason,
			"Publish failed after commit; parking event"
		);

		match self
			.dead_letters
			.park(&DeadLetter::unpublished(event, reason.clone()))
			.await
		{
			Ok(()) => PublishReceipt::Parked { reason },
			Err(park_error) => {
				tracing::error!(
					order_id = %event.order_id(),
					event = %event.kind(),
					error = %park_error,
					"Failed to park unpublished event"
				);
				PublishReceipt::Lost {
					reason: format!("{}; parking failed: {}", reason, park_error),
				}
			},
		}
	}
}
