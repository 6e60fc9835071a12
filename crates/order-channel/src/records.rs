//! Records persisted by the channel and the redelivery policy.

use chrono::{DateTime, Utc};
use order_types::OrderEvent;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// One message pending for one subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
	pub id: Uuid,
	/// Shared by all deliveries fanned out from the same publish.
	pub message_id: Uuid,
	pub subscriber: String,
	pub event: OrderEvent,
	/// Handler invocations so far.
	pub attempts: u32,
	pub last_error: Option<String>,
	pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
	pub fn new(message_id: Uuid, subscriber: impl Into<String>, event: OrderEvent) -> Self {
		Self {
			id: Uuid::new_v4(),
			message_id,
			subscriber: subscriber.into(),
			event,
			attempts: 0,
			last_error: None,
			enqueued_at: Utc::now(),
		}
	}
}

/// A message that exhausted its redelivery policy, or an event that could not
/// be published at all (`subscriber` is `None` then).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
	pub id: Uuid,
	pub event: OrderEvent,
	pub subscriber: Option<String>,
	pub attempts: u32,
	pub reason: String,
	pub parked_at: DateTime<Utc>,
}

impl DeadLetter {
	/// Parks a delivery that failed on every attempt.
	pub fn from_delivery(delivery: &Delivery) -> Self {
		Self {
			id: Uuid::new_v4(),
			event: delivery.event,
			subscriber: Some(delivery.subscriber.clone()),
			attempts: delivery.attempts,
			reason: delivery
				.last_error
				.clone()
				.unwrap_or_else(|| "unknown".to_string()),
			parked_at: Utc::now(),
		}
	}

	/// Parks an event the channel never accepted.
	pub fn unpublished(event: OrderEvent, reason: impl Into<String>) -> Self {
		Self {
			id: Uuid::new_v4(),
			event,
			subscriber: None,
			attempts: 0,
			reason: reason.into(),
			parked_at: Utc::now(),
		}
	}
}

/// How often a failing delivery is retried before it is parked.
///
/// After the first attempt fails the handler is retried `immediate_retries`
/// times back to back, then `delayed_retries` times waiting
/// `retry_delay * 2^n` before the n-th delayed retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
	pub immediate_retries: u32,
	pub delayed_retries: u32,
	pub retry_delay: Duration,
}

impl Default for RedeliveryPolicy {
	fn default() -> Self {
		Self {
			immediate_retries: 3,
			delayed_retries: 3,
			retry_delay: Duration::from_secs(10),
		}
	}
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NextStep {
	RetryNow,
	RetryAfter(Duration),
	Park,
}

impl RedeliveryPolicy {
	/// Upper bound on handler invocations for one delivery.
	pub fn max_attempts(&self) -> u32 {
		1 + self.immediate_retries + self.delayed_retries
	}

	/// Decides the next step given the number of attempts already made.
	pub(crate) fn next_step(&self, attempts: u32) -> NextStep {
		let retries_used = attempts.saturating_sub(1);
		if retries_used < self.immediate_retries {
			return NextStep::RetryNow;
		}
		let delayed_used = retries_used - self.immediate_retries;
		if delayed_used < self.delayed_retries {
			let factor = 2u32.saturating_pow(delayed_used);
			return NextStep::RetryAfter(self.retry_delay.saturating_mul(factor));
		}
		NextStep::Park
	}
}
