//! Recovery module for restoring engine state from storage after a restart.
//!
//! Seeds the configured catalog, re-queues channel deliveries that were not
//! acknowledged before the process stopped, and re-publishes events that were
//! committed to but never reached the channel: `OrderCreated` for Pending
//! orders, and `OrderCompleted` / `OrderExpired` for terminal orders that
//! have no notification of that kind yet.

use crate::publish::PostCommitPublisher;
use order_channel::{DeadLetter, Delivery, EventChannel};
use order_storage::{QueryFilter, StorageService};
use order_types::{
	truncate_id, EventKind, Notification, NotificationKind, Order, OrderEvent, OrderStatus, Product,
	StorageKey,
};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

/// Errors that can occur during recovery operations.
#[derive(Debug, Error)]
pub enum RecoveryError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Channel error: {0}")]
	Channel(String),
}

/// Report of the recovery operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
	/// Catalog products written because they were absent.
	pub seeded_products: usize,
	/// Persisted deliveries handed back to their subscribers.
	pub requeued_deliveries: usize,
	/// Events published again for orders whose last transition never
	/// reached the channel.
	pub republished_events: usize,
}

/// Service responsible for recovering engine state from storage.
pub struct RecoveryService {
	storage: Arc<StorageService>,
	channel: EventChannel,
	publisher: Arc<PostCommitPublisher>,
	catalog: Vec<Product>,
}

impl RecoveryService {
	pub fn new(
		storage: Arc<StorageService>,
		channel: EventChannel,
		publisher: Arc<PostCommitPublisher>,
		catalog: Vec<Product>,
	) -> Self {
		Self {
			storage,
			channel,
			publisher,
			catalog,
		}
	}

	/// Performs full state recovery. Subscribers must be registered first so
	/// re-queued deliveries find their queues.
	#[instrument(skip_all)]
	pub async fn recover_state(&self) -> Result<RecoveryReport, RecoveryError> {
		tracing::info!("Starting state recovery from storage");

		let report = RecoveryReport {
			seeded_products: self.seed_catalog().await?,
			requeued_deliveries: self
				.channel
				.recover()
				.await
				.map_err(|e| RecoveryError::Channel(e.to_string()))?,
			republished_events: self.republish_stranded_events().await?,
		};

		tracing::info!(
			seeded_products = report.seeded_products,
			requeued_deliveries = report.requeued_deliveries,
			republished_events = report.republished_events,
			"State recovery completed"
		);
		Ok(report)
	}

	/// Writes catalog products that are not in storage yet. Existing products
	/// keep their stored stock.
	async fn seed_catalog(&self) -> Result<usize, RecoveryError> {
		if self.catalog.is_empty() {
			return Ok(0);
		}

		let mut uow = self.storage.begin().await;
		let mut seeded = 0;
		for product in &self.catalog {
			let id = product.id.to_string();
			let existing: Option<Product> = uow
				.get(StorageKey::Products.as_str(), &id)
				.await
				.map_err(|e| RecoveryError::Storage(e.to_string()))?;
			if existing.is_none() {
				uow.put(StorageKey::Products.as_str(), &id, product)
					.map_err(|e| RecoveryError::Storage(e.to_string()))?;
				seeded += 1;
			}
		}
		uow.commit()
			.await
			.map_err(|e| RecoveryError::Storage(e.to_string()))?;

		if seeded > 0 {
			tracing::info!(seeded, "Seeded catalog products");
		}
		Ok(seeded)
	}

	/// An order is stranded when the event owed by its current status is
	/// neither pending delivery nor parked: the transition committed but the
	/// publish never happened. A terminal order whose notification exists has
	/// been fully handled.
	async fn republish_stranded_events(&self) -> Result<usize, RecoveryError> {
		let statuses = [OrderStatus::Pending, OrderStatus::Completed, OrderStatus::Expired]
			.into_iter()
			.map(serde_json::to_value)
			.collect::<Result<Vec<_>, _>>()
			.map_err(|e| RecoveryError::Storage(e.to_string()))?;
		let orders: Vec<(String, Order)> = self
			.storage
			.query(
				StorageKey::Orders.as_str(),
				QueryFilter::In("status".to_string(), statuses),
			)
			.await
			.map_err(|e| RecoveryError::Storage(e.to_string()))?;
		if orders.is_empty() {
			return Ok(0);
		}

		let mut tracked: HashSet<(Uuid, EventKind)> = HashSet::new();
		let deliveries: Vec<(String, Delivery)> = self
			.storage
			.query(StorageKey::Deliveries.as_str(), QueryFilter::All)
			.await
			.map_err(|e| RecoveryError::Storage(e.to_string()))?;
		tracked.extend(deliveries.iter().map(|(_, d)| (d.event.order_id(), d.event.kind())));
		let parked: Vec<(String, DeadLetter)> = self
			.storage
			.query(StorageKey::DeadLetters.as_str(), QueryFilter::All)
			.await
			.map_err(|e| RecoveryError::Storage(e.to_string()))?;
		tracked.extend(parked.iter().map(|(_, l)| (l.event.order_id(), l.event.kind())));

		let mut republished = 0;
		for (_, order) in orders {
			let event = match order.status {
				OrderStatus::Pending => OrderEvent::Created { order_id: order.id },
				OrderStatus::Completed => {
					if self.is_notified(order.id, NotificationKind::Completed).await? {
						continue;
					}
					OrderEvent::Completed { order_id: order.id }
				},
				OrderStatus::Expired => {
					if self.is_notified(order.id, NotificationKind::Expired).await? {
						continue;
					}
					OrderEvent::Expired { order_id: order.id }
				},
				OrderStatus::Processing => continue,
			};
			if tracked.contains(&(order.id, event.kind())) {
				continue;
			}

			tracing::info!(
				order_id = %truncate_id(&order.id.to_string()),
				event = %event.kind(),
				"Re-publishing event for stranded order"
			);
			if self.publisher.publish(event).await.is_delivered() {
				republished += 1;
			}
		}
		Ok(republished)
	}

	async fn is_notified(&self, order_id: Uuid, kind: NotificationKind) -> Result<bool, RecoveryError> {
		self.storage
			.exists(
				StorageKey::Notifications.as_str(),
				&Notification::key(&order_id, kind),
			)
			.await
			.map_err(|e| RecoveryError::Storage(e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use chrono::Utc;
	use order_channel::{DeadLetters, EventHandler, HandlerFault, RedeliveryPolicy};
	use order_storage::implementations::memory::MemoryStorage;
	use rust_decimal_macros::dec;
	use std::time::Duration;
	use tokio::sync::mpsc;
	use tokio_util::sync::CancellationToken;

	struct Forward(mpsc::UnboundedSender<OrderEvent>);

	#[async_trait]
	impl EventHandler for Forward {
		async fn handle(&self, event: OrderEvent) -> Result<(), HandlerFault> {
			let _ = self.0.send(event);
			Ok(())
		}
	}

	struct Fixture {
		recovery: RecoveryService,
		storage: Arc<StorageService>,
		channel: EventChannel,
	}

	fn fixture(storage: Arc<StorageService>, catalog: Vec<Product>) -> Fixture {
		let channel = EventChannel::new(storage.clone(), RedeliveryPolicy::default(), 4);
		let publisher = Arc::new(PostCommitPublisher::new(
			Arc::new(channel.clone()),
			DeadLetters::new(storage.clone()),
			Duration::from_millis(100),
		));
		Fixture {
			recovery: RecoveryService::new(storage.clone(), channel.clone(), publisher, catalog),
			storage,
			channel,
		}
	}

	async fn store_pending_order(storage: &StorageService) -> Uuid {
		store_order(storage, OrderStatus::Pending).await
	}

	async fn store_order(storage: &StorageService, status: OrderStatus) -> Uuid {
		let mut order = Order::new("user-1", dec!(5), Utc::now());
		order.status = status;
		storage
			.store(StorageKey::Orders.as_str(), &order.id.to_string(), &order)
			.await
			.unwrap();
		order.id
	}

	#[tokio::test]
	async fn test_seeds_missing_products_only() {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let existing = Product {
			id: Uuid::new_v4(),
			name: "Widget".into(),
			price: dec!(10.99),
			stock: 98,
		};
		storage
			.store(
				StorageKey::Products.as_str(),
				&existing.id.to_string(),
				&existing,
			)
			.await
			.unwrap();

		let fresh = Product {
			id: Uuid::new_v4(),
			name: "Gadget".into(),
			price: dec!(4),
			stock: 10,
		};
		let restocked = Product {
			stock: 100,
			..existing.clone()
		};
		let f = fixture(storage, vec![restocked, fresh.clone()]);

		let report = f.recovery.recover_state().await.unwrap();
		assert_eq!(report.seeded_products, 1);

		let kept: Product = f
			.storage
			.retrieve(StorageKey::Products.as_str(), &existing.id.to_string())
			.await
			.unwrap();
		assert_eq!(kept.stock, 98);
		let seeded: Product = f
			.storage
			.retrieve(StorageKey::Products.as_str(), &fresh.id.to_string())
			.await
			.unwrap();
		assert_eq!(seeded, fresh);
	}

	#[tokio::test]
	async fn test_republishes_only_stranded_pending_orders() {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let stranded = store_pending_order(&storage).await;
		let tracked = store_pending_order(&storage).await;
		let parked = store_pending_order(&storage).await;

		let delivery = Delivery::new(
			Uuid::new_v4(),
			"processing",
			OrderEvent::Created { order_id: tracked },
		);
		storage
			.store(
				StorageKey::Deliveries.as_str(),
				&delivery.id.to_string(),
				&delivery,
			)
			.await
			.unwrap();
		DeadLetters::new(storage.clone())
			.park(&DeadLetter::unpublished(
				OrderEvent::Created { order_id: parked },
				"channel down",
			))
			.await
			.unwrap();

		let f = fixture(storage, Vec::new());
		let (tx, mut rx) = mpsc::unbounded_channel();
		let consumer = f
			.channel
			.subscribe("processing", [EventKind::OrderCreated], Arc::new(Forward(tx)))
			.await
			.unwrap();
		let token = CancellationToken::new();
		let task = tokio::spawn(consumer.run(token.clone()));

		let report = f.recovery.recover_state().await.unwrap();
		assert_eq!(report.requeued_deliveries, 1);
		assert_eq!(report.republished_events, 1);

		let mut seen = HashSet::new();
		for _ in 0..2 {
			seen.insert(rx.recv().await.unwrap().order_id());
		}
		assert_eq!(seen, HashSet::from([stranded, tracked]));

		token.cancel();
		task.await.unwrap();
	}

	#[tokio::test]
	async fn test_republishes_terminal_event_lost_before_publish() {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let completed = store_order(&storage, OrderStatus::Completed).await;
		let expired = store_order(&storage, OrderStatus::Expired).await;
		let notified = store_order(&storage, OrderStatus::Completed).await;
		let parked = store_order(&storage, OrderStatus::Expired).await;
		store_order(&storage, OrderStatus::Processing).await;

		let notification = Notification::new(notified, NotificationKind::Completed, "done");
		storage
			.store(
				StorageKey::Notifications.as_str(),
				&Notification::key(&notified, NotificationKind::Completed),
				&notification,
			)
			.await
			.unwrap();
		DeadLetters::new(storage.clone())
			.park(&DeadLetter::unpublished(
				OrderEvent::Expired { order_id: parked },
				"channel down",
			))
			.await
			.unwrap();

		let f = fixture(storage, Vec::new());
		let (tx, mut rx) = mpsc::unbounded_channel();
		let consumer = f
			.channel
			.subscribe(
				"notification",
				[EventKind::OrderCompleted, EventKind::OrderExpired],
				Arc::new(Forward(tx)),
			)
			.await
			.unwrap();
		let token = CancellationToken::new();
		let task = tokio::spawn(consumer.run(token.clone()));

		let report = f.recovery.recover_state().await.unwrap();
		assert_eq!(report.republished_events, 2);

		let mut seen = HashSet::new();
		for _ in 0..2 {
			seen.insert(rx.recv().await.unwrap());
		}
		assert_eq!(
			seen,
			HashSet::from([
				OrderEvent::Completed {
					order_id: completed
				},
				OrderEvent::Expired { order_id: expired },
			])
		);
		assert!(rx.try_recv().is_err());

		token.cancel();
		task.await.unwrap();
	}
}
