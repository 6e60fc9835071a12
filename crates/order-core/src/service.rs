//! Order creation and lookup.
//!
//! Creation is a single unit of work: the products are loaded, stock is
//! checked and decremented, and the order with its items is written, all
//! committed together or not at all. `OrderCreated` is published only after
//! the commit succeeds.

use crate::publish::{PostCommitPublisher, PublishReceipt};
use chrono::Utc;
use order_storage::{QueryFilter, StorageError, StorageService};
use order_types::{truncate_id, Order, OrderEvent, OrderItem, Product, StorageKey};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

/// Reasons an order is rejected. Nothing is written and nothing is published
/// in any of these cases.
#[derive(Debug, Error)]
pub enum CreateOrderError {
	#[error("Order has no items")]
	EmptyOrder,
	#[error("Quantity must be at least 1 for product {product_id}")]
	InvalidQuantity { product_id: Uuid },
	#[error("Product not found: {0}")]
	ProductNotFound(Uuid),
	#[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
	InsufficientStock {
		product_id: Uuid,
		available: u32,
		requested: u64,
	},
	#[error("Storage error: {0}")]
	Storage(String),
}

/// One requested `(product, quantity)` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLine {
	pub product_id: Uuid,
	pub quantity: u32,
}

/// A committed order and what happened to its `OrderCreated` event.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
	pub order: Order,
	pub items: Vec<OrderItem>,
	pub publish: PublishReceipt,
}

pub struct OrderService {
	storage: Arc<StorageService>,
	publisher: Arc<PostCommitPublisher>,
}

impl OrderService {
	pub fn new(storage: Arc<StorageService>, publisher: Arc<PostCommitPublisher>) -> Self {
		Self { storage, publisher }
	}

	/// Places an order for `owner_id`.
	///
	/// Lines naming the same product are summed for the stock check. The
	/// total uses the product prices read inside the unit of work. Returns as
	/// soon as the order is committed and handed to the channel.
	#[instrument(skip_all, fields(owner_id = %owner_id, lines = lines.len()))]
	pub async fn create_order(
		&self,
		owner_id: &str,
		lines: &[OrderLine],
	) -> Result<CreatedOrder, CreateOrderError> {
		if lines.is_empty() {
			return Err(CreateOrderError::EmptyOrder);
		}
		if let Some(line) = lines.iter().find(|line| line.quantity == 0) {
			return Err(CreateOrderError::InvalidQuantity {
				product_id: line.product_id,
			});
		}

		let mut requested: HashMap<Uuid, u64> = HashMap::new();
		for line in lines {
			*requested.entry(line.product_id).or_default() += u64::from(line.quantity);
		}

		let mut uow = self.storage.begin().await;

		// Walk the lines rather than the map so errors name the first offending line.
		let mut products: HashMap<Uuid, Product> = HashMap::new();
		for line in lines {
			if products.contains_key(&line.product_id) {
				continue;
			}
			let product: Product = uow
				.get(StorageKey::Products.as_str(), &line.product_id.to_string())
				.await
				.map_err(storage_error)?
				.ok_or(CreateOrderError::ProductNotFound(line.product_id))?;

			let wanted = requested[&line.product_id];
			if wanted > u64::from(product.stock) {
				return Err(CreateOrderError::InsufficientStock {
					product_id: product.id,
					available: product.stock,
					requested: wanted,
				});
			}
			products.insert(product.id, product);
		}

		let mut order = Order::new(owner_id, Decimal::ZERO, Utc::now());
		let items: Vec<OrderItem> = lines
			.iter()
			.map(|line| OrderItem {
				id: Uuid::new_v4(),
				order_id: order.id,
				product_id: line.product_id,
				quantity: line.quantity,
				price: products[&line.product_id].price,
			})
			.collect();
		order.total = items.iter().map(OrderItem::subtotal).sum();

		for product in products.values_mut() {
			// Checked above: the summed quantity fits in the current stock.
			product.stock -= requested[&product.id] as u32;
			uow.put(
				StorageKey::Products.as_str(),
				&product.id.to_string(),
				&*product,
			)
			.map_err(storage_error)?;
		}
		for item in &items {
			uow.put(StorageKey::OrderItems.as_str(), &item.id.to_string(), item)
				.map_err(storage_error)?;
		}
		uow.put(StorageKey::Orders.as_str(), &order.id.to_string(), &order)
			.map_err(storage_error)?;
		uow.commit().await.map_err(storage_error)?;

		tracing::info!(
			order_id = %truncate_id(&order.id.to_string()),
			total = %order.total,
			items = items.len(),
			"Order created"
		);

		let publish = self
			.publisher
			.publish(OrderEvent::Created { order_id: order.id })
			.await;

		Ok(CreatedOrder {
			order,
			items,
			publish,
		})
	}

	pub async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StorageError> {
		self.storage
			.retrieve_optional(StorageKey::Orders.as_str(), &order_id.to_string())
			.await
	}

	pub async fn get_order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StorageError> {
		let items = self
			.storage
			.query(
				StorageKey::OrderItems.as_str(),
				QueryFilter::Equals(
					"order_id".to_string(),
					serde_json::Value::String(order_id.to_string()),
				),
			)
			.await?;
		Ok(items.into_iter().map(|(_, item)| item).collect())
	}

	pub async fn get_product(&self, product_id: Uuid) -> Result<Option<Product>, StorageError> {
		self.storage
			.retrieve_optional(StorageKey::Products.as_str(), &product_id.to_string())
			.await
	}
}

fn storage_error(e: StorageError) -> CreateOrderError {
	CreateOrderError::Storage(e.to_string())
}
