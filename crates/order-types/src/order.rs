//! Order lifecycle records.
//!
//! An order moves through `Pending -> Processing -> {Completed | Expired}`.
//! Items capture the unit price at creation time so later price changes on the
//! product never alter an order total.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A customer order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
	/// Unique identifier for this order.
	pub id: Uuid,
	/// Reference to the owning user, issued by an external identity provider.
	pub owner_id: String,
	/// Sum of `price * quantity` over all items. Fixed at creation.
	pub total: Decimal,
	/// Current lifecycle status.
	pub status: OrderStatus,
	/// Timestamp when this order was created.
	pub created_at: DateTime<Utc>,
	/// Timestamp when this order was last updated.
	pub updated_at: DateTime<Utc>,
}

impl Order {
	/// Creates a new pending order.
	pub fn new(owner_id: impl Into<String>, total: Decimal, now: DateTime<Utc>) -> Self {
		Self {
			id: Uuid::new_v4(),
			owner_id: owner_id.into(),
			total,
			status: OrderStatus::Pending,
			created_at: now,
			updated_at: now,
		}
	}
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
	pub id: Uuid,
	pub order_id: Uuid,
	pub product_id: Uuid,
	/// Always at least 1.
	pub quantity: u32,
	/// Unit price captured when the order was placed.
	pub price: Decimal,
}

impl OrderItem {
	/// Line subtotal (`price * quantity`).
	pub fn subtotal(&self) -> Decimal {
		self.price * Decimal::from(self.quantity)
	}
}

/// A sellable product with a stock counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
	pub id: Uuid,
	#[serde(default)]
	pub name: String,
	pub price: Decimal,
	/// Units available. Never negative.
	pub stock: u32,
}

/// Status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
	/// Order is committed and waiting for the processing handler.
	Pending,
	/// Processing started. Stays here if the outcome draw fails.
	Processing,
	/// Processing succeeded.
	Completed,
	/// Processing never finished within the sweeper timeout.
	Expired,
}

impl OrderStatus {
	/// Terminal statuses accept no further transitions.
	pub fn is_terminal(&self) -> bool {
		matches!(self, OrderStatus::Completed | OrderStatus::Expired)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OrderStatus::Pending => write!(f, "Pending"),
			OrderStatus::Processing => write!(f, "Processing"),
			OrderStatus::Completed => write!(f, "Completed"),
			OrderStatus::Expired => write!(f, "Expired"),
		}
	}
}

/// Kind of audit notification recorded for a terminal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
	Completed,
	Expired,
}

impl NotificationKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			NotificationKind::Completed => "completed",
			NotificationKind::Expired => "expired",
		}
	}
}

/// Audit record written by the notification recorder.
///
/// At most one notification exists per `(order_id, kind)`; the pair forms the
/// storage key, see [`Notification::key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
	pub id: Uuid,
	pub order_id: Uuid,
	#[serde(rename = "type")]
	pub kind: NotificationKind,
	pub message: String,
	pub created_at: DateTime<Utc>,
}

impl Notification {
	pub fn new(order_id: Uuid, kind: NotificationKind, message: impl Into<String>) -> Self {
		Self {
			id: Uuid::new_v4(),
			order_id,
			kind,
			message: message.into(),
			created_at: Utc::now(),
		}
	}

	/// Deterministic storage key for the `(order_id, kind)` pair.
	pub fn key(order_id: &Uuid, kind: NotificationKind) -> String {
		format!("{}_{}", order_id, kind.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rust_decimal_macros::dec;

	#[test]
	fn test_item_subtotal() {
		let item = OrderItem {
			id: Uuid::new_v4(),
			order_id: Uuid::new_v4(),
			product_id: Uuid::new_v4(),
			quantity: 2,
			price: dec!(10.99),
		};
		assert_eq!(item.subtotal(), dec!(21.98));
	}

	#[test]
	fn test_status_serialization() {
		assert_eq!(
			serde_json::to_value(OrderStatus::Processing).unwrap(),
			serde_json::json!("processing")
		);
		assert!(OrderStatus::Expired.is_terminal());
		assert!(!OrderStatus::Processing.is_terminal());
	}

	#[test]
	fn test_notification_key_is_per_kind() {
		let order_id = Uuid::new_v4();
		assert_ne!(
			Notification::key(&order_id, NotificationKind::Completed),
			Notification::key(&order_id, NotificationKind::Expired)
		);
	}
}
