//! Event types for inter-component communication.
//!
//! Events carry only the order identifier. Consumers always re-fetch the
//! authoritative order from storage, so a stale or duplicated event can never
//! carry outdated state into a handler.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Events published on the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
	/// An order was committed with status Pending.
	#[serde(rename = "OrderCreated")]
	Created { order_id: Uuid },
	/// The processing handler moved the order to Completed.
	#[serde(rename = "OrderCompleted")]
	Completed { order_id: Uuid },
	/// The expiration sweeper moved the order to Expired.
	#[serde(rename = "OrderExpired")]
	Expired { order_id: Uuid },
}

impl OrderEvent {
	/// Identifier of the order this event refers to.
	pub fn order_id(&self) -> Uuid {
		match self {
			OrderEvent::Created { order_id }
			| OrderEvent::Completed { order_id }
			| OrderEvent::Expired { order_id } => *order_id,
		}
	}

	pub fn kind(&self) -> EventKind {
		match self {
			OrderEvent::Created { .. } => EventKind::OrderCreated,
			OrderEvent::Completed { .. } => EventKind::OrderCompleted,
			OrderEvent::Expired { .. } => EventKind::OrderExpired,
		}
	}
}

/// Topic an event is published under. Subscribers filter on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
	OrderCreated,
	OrderCompleted,
	OrderExpired,
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EventKind::OrderCreated => write!(f, "OrderCreated"),
			EventKind::OrderCompleted => write!(f, "OrderCompleted"),
			EventKind::OrderExpired => write!(f, "OrderExpired"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_wire_format_is_identifier_only() {
		let order_id = Uuid::new_v4();
		let value = serde_json::to_value(OrderEvent::Created { order_id }).unwrap();

		assert_eq!(
			value,
			serde_json::json!({ "type": "OrderCreated", "order_id": order_id.to_string() })
		);
	}

	#[test]
	fn test_kind_and_order_id() {
		let order_id = Uuid::new_v4();
		let event = OrderEvent::Expired { order_id };
		assert_eq!(event.kind(), EventKind::OrderExpired);
		assert_eq!(event.order_id(), order_id);
	}
}
