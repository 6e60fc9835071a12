//! Processing handler for newly created orders.
//!
//! Moves a Pending order to Processing, simulates the processing work, and
//! completes the order when the outcome draw succeeds. A failed draw leaves
//! the order in Processing for the expiration sweeper.

use crate::outcome::OutcomeSource;
use crate::publish::PostCommitPublisher;
use crate::state::{OrderStateError, OrderStateMachine, TransitionOutcome};
use async_trait::async_trait;
use order_channel::{EventHandler, HandlerFault};
use order_types::{truncate_id, OrderEvent, OrderStatus};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

/// Errors that can occur while processing an order.
#[derive(Debug, Error)]
pub enum ProcessingError {
	#[error("State error: {0}")]
	State(#[from] OrderStateError),
}

/// What a processing attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
	/// No order with this id exists.
	Missing,
	/// The order already reached a terminal status; nothing to do.
	AlreadyTerminal(OrderStatus),
	/// The order was completed and `OrderCompleted` was handed to the publisher.
	Completed,
	/// The draw failed; the order stays in Processing.
	LeftProcessing,
	/// Another writer changed the order first.
	LostRace(OrderStatus),
}

/// Handler reacting to `OrderCreated`.
pub struct ProcessingHandler {
	state_machine: Arc<OrderStateMachine>,
	publisher: Arc<PostCommitPublisher>,
	outcome: Arc<dyn OutcomeSource>,
	delay: Duration,
}

impl ProcessingHandler {
	pub fn new(
		state_machine: Arc<OrderStateMachine>,
		publisher: Arc<PostCommitPublisher>,
		outcome: Arc<dyn OutcomeSource>,
		delay: Duration,
	) -> Self {
		Self {
			state_machine,
			publisher,
			outcome,
			delay,
		}
	}

	/// Runs one processing attempt for `order_id`.
	///
	/// Safe under redelivery: an order already in Processing is resumed, and
	/// a terminal order is left untouched.
	#[instrument(skip_all, fields(order_id = %truncate_id(&order_id.to_string())))]
	pub async fn process(&self, order_id: Uuid) -> Result<ProcessingOutcome, ProcessingError> {
		let Some(order) = self.state_machine.get_order(order_id).await? else {
			tracing::warn!("Order not found; dropping event");
			return Ok(ProcessingOutcome::Missing);
		};
		if order.status.is_terminal() {
			tracing::debug!(status = ?order.status, "Order already terminal");
			return Ok(ProcessingOutcome::AlreadyTerminal(order.status));
		}

		match self
			.state_machine
			.transition(order_id, OrderStatus::Pending, OrderStatus::Processing)
			.await?
		{
			TransitionOutcome::Applied(_) => {
				tracing::info!("Order processing started");
			},
			TransitionOutcome::Skipped {
				current: OrderStatus::Processing,
			} => {
				tracing::info!("Resuming order already in processing");
			},
			TransitionOutcome::Skipped { current } => {
				return Ok(if current.is_terminal() {
					ProcessingOutcome::AlreadyTerminal(current)
				} else {
					ProcessingOutcome::LostRace(current)
				});
			},
		}

		if !self.delay.is_zero() {
			tokio::time::sleep(self.delay).await;
		}

		if !self.outcome.draw() {
			tracing::info!("Processing attempt failed; order left in processing");
			return Ok(ProcessingOutcome::LeftProcessing);
		}

		match self
			.state_machine
			.transition(order_id, OrderStatus::Processing, OrderStatus::Completed)
			.await?
		{
			TransitionOutcome::Applied(_) => {},
			TransitionOutcome::Skipped { current } => {
				tracing::info!(status = ?current, "Order changed during processing");
				return Ok(ProcessingOutcome::LostRace(current));
			},
		}

		tracing::info!("Order completed");
		self.publisher
			.publish(OrderEvent::Completed { order_id })
			.await;
		Ok(ProcessingOutcome::Completed)
	}
}

#[async_trait]
impl EventHandler for ProcessingHandler {
	async fn handle(&self, event: OrderEvent) -> Result<(), HandlerFault> {
		match event {
			OrderEvent::Created { order_id } => self
				.process(order_id)
				.await
				.map(|_| ())
				.map_err(HandlerFault::new),
			other => {
				tracing::debug!(event = %other.kind(), "Ignoring event");
				Ok(())
			},
		}
	}
}
