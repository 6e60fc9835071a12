//! Order state machine implementation.
//!
//! Orders move `Pending -> Processing -> {Completed | Expired}`. Every
//! transition is guarded: it names the status the caller expects the order to
//! be in and is skipped, not applied, when the stored status differs. Two
//! writers racing for the same order (the processing handler and the sweeper,
//! or two redeliveries of one event) therefore cannot both win.

use chrono::Utc;
use once_cell::sync::Lazy;
use order_storage::{StorageService, UnitOfWork};
use order_types::{Order, OrderStatus, StorageKey};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during order state management.
#[derive(Debug, Error)]
pub enum OrderStateError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Invalid state transition from {from:?} to {to:?}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	#[error("Order not found: {0}")]
	OrderNotFound(Uuid),
}

/// Result of a guarded transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
	/// The order was in the expected status and now has the new one.
	Applied(Order),
	/// The order was in another status; nothing was written.
	Skipped { current: OrderStatus },
}

/// Manages order state transitions and persistence
pub struct OrderStateMachine {
	storage: Arc<StorageService>,
}

impl OrderStateMachine {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Checks if a state transition is valid
	pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
		static TRANSITIONS: Lazy<HashMap<OrderStatus, HashSet<OrderStatus>>> = Lazy::new(|| {
			HashMap::from([
				(OrderStatus::Pending, HashSet::from([OrderStatus::Processing])),
				(
					OrderStatus::Processing,
					HashSet::from([OrderStatus::Completed, OrderStatus::Expired]),
				),
				(OrderStatus::Completed, HashSet::new()), // terminal
				(OrderStatus::Expired, HashSet::new()),   // terminal
			])
		});

		TRANSITIONS
			.get(&from)
			.is_some_and(|allowed| allowed.contains(&to))
	}

	/// Gets an order by ID, `None` when it does not exist.
	pub async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, OrderStateError> {
		self.storage
			.retrieve_optional(StorageKey::Orders.as_str(), &order_id.to_string())
			.await
			.map_err(|e| OrderStateError::Storage(e.to_string()))
	}

	/// Applies `expected -> to` inside an open unit of work. The write is
	/// buffered; the caller commits.
	pub async fn transition_in(
		uow: &mut UnitOfWork<'_>,
		order_id: Uuid,
		expected: OrderStatus,
		to: OrderStatus,
	) -> Result<TransitionOutcome, OrderStateError> {
		if !Self::is_valid_transition(expected, to) {
			return Err(OrderStateError::InvalidTransition { from: expected, to });
		}

		let id = order_id.to_string();
		let mut order: Order = uow
			.get(StorageKey::Orders.as_str(), &id)
			.await
			.map_err(|e| OrderStateError::Storage(e.to_string()))?
			.ok_or(OrderStateError::OrderNotFound(order_id))?;

		if order.status != expected {
			return Ok(TransitionOutcome::Skipped {
				current: order.status,
			});
		}

		order.status = to;
		order.updated_at = Utc::now();
		uow.put(StorageKey::Orders.as_str(), &id, &order)
			.map_err(|e| OrderStateError::Storage(e.to_string()))?;
		Ok(TransitionOutcome::Applied(order))
	}

	/// Applies `expected -> to` in its own unit of work and commits it.
	pub async fn transition(
		&self,
		order_id: Uuid,
		expected: OrderStatus,
		to: OrderStatus,
	) -> Result<TransitionOutcome, OrderStateError> {
		let mut uow = self.storage.begin().await;
		let outcome = Self::transition_in(&mut uow, order_id, expected, to).await?;
		if matches!(outcome, TransitionOutcome::Applied(_)) {
			uow.commit()
				.await
				.map_err(|e| OrderStateError::Storage(e.to_string()))?;
		}
		Ok(outcome)
	}
}
