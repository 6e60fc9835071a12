//! Storage-related types for the order flow system.

use std::str::FromStr;

/// Storage namespaces for the different record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Order records keyed by order id.
	Orders,
	/// Order items keyed by item id.
	OrderItems,
	/// Products keyed by product id.
	Products,
	/// Notifications keyed by `{order_id}_{kind}`.
	Notifications,
	/// Unacknowledged channel deliveries keyed by delivery id.
	Deliveries,
	/// Parked messages keyed by dead letter id.
	DeadLetters,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::OrderItems => "order_items",
			StorageKey::Products => "products",
			StorageKey::Notifications => "notifications",
			StorageKey::Deliveries => "deliveries",
			StorageKey::DeadLetters => "dead_letters",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Orders,
			Self::OrderItems,
			Self::Products,
			Self::Notifications,
			Self::Deliveries,
			Self::DeadLetters,
		]
		.into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all().find(|key| key.as_str() == s).ok_or(())
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}
