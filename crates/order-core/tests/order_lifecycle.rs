//! End-to-end order lifecycle through a running engine.

mod common;

use chrono::Utc;
use common::*;
use order_channel::EventPublisher;
use order_core::{CreateOrderError, FixedOutcome, OrderLine, PublishReceipt};
use order_types::{NotificationKind, Order, OrderEvent, OrderStatus, StorageKey};
use rust_decimal_macros::dec;
use std::sync::Arc;

async fn order_status(running: &Running, order_id: uuid::Uuid) -> Option<OrderStatus> {
	running
		.engine
		.orders()
		.get_order(order_id)
		.await
		.unwrap()
		.map(|o| o.status)
}

#[tokio::test]
async fn test_order_is_completed_and_notified_once() {
	let widget = product(dec!(10.99), 100);
	let running = start(
		config_with(std::slice::from_ref(&widget)).build(),
		Arc::new(FixedOutcome(true)),
	)
	.await;
	wait_for_catalog(&running.engine, std::slice::from_ref(&widget)).await;

	let created = running
		.engine
		.orders()
		.create_order(
			"user-1",
			&[OrderLine {
				product_id: widget.id,
				quantity: 2,
			}],
		)
		.await
		.unwrap();
	assert_eq!(created.order.total, dec!(21.98));
	assert_eq!(created.order.status, OrderStatus::Pending);
	assert!(created.publish.is_delivered());

	let stock = running
		.engine
		.orders()
		.get_product(widget.id)
		.await
		.unwrap()
		.unwrap()
		.stock;
	assert_eq!(stock, 98);

	let order_id = created.order.id;
	eventually("completion notification", || {
		let engine = &running.engine;
		async move { count_notifications(engine, order_id, NotificationKind::Completed).await == 1 }
	})
	.await;
	assert_eq!(order_status(&running, order_id).await, Some(OrderStatus::Completed));

	// A redelivered creation event changes nothing.
	running
		.engine
		.channel()
		.publish(OrderEvent::Created { order_id })
		.await
		.unwrap();
	eventually("redelivery acknowledged", || {
		let engine = &running.engine;
		async move {
			engine
				.storage()
				.query::<serde_json::Value>(
					StorageKey::Deliveries.as_str(),
					order_storage::QueryFilter::All,
				)
				.await
				.unwrap()
				.is_empty()
		}
	})
	.await;
	assert_eq!(notifications(&running.engine, order_id).await.len(), 1);
	assert_eq!(order_status(&running, order_id).await, Some(OrderStatus::Completed));

	running.stop().await;
}

#[tokio::test]
async fn test_insufficient_stock_is_rejected_without_side_effects() {
	let widget = product(dec!(10.99), 100);
	let running = start(
		config_with(std::slice::from_ref(&widget)).build(),
		Arc::new(FixedOutcome(true)),
	)
	.await;
	wait_for_catalog(&running.engine, std::slice::from_ref(&widget)).await;

	let result = running
		.engine
		.orders()
		.create_order(
			"user-1",
			&[OrderLine {
				product_id: widget.id,
				quantity: 999_999,
			}],
		)
		.await;
	assert!(matches!(
		result,
		Err(CreateOrderError::InsufficientStock {
			available: 100,
			requested: 999_999,
			..
		})
	));

	let stock = running
		.engine
		.orders()
		.get_product(widget.id)
		.await
		.unwrap()
		.unwrap()
		.stock;
	assert_eq!(stock, 100);

	let orders = running
		.engine
		.storage()
		.query::<Order>(StorageKey::Orders.as_str(), order_storage::QueryFilter::All)
		.await
		.unwrap();
	assert!(orders.is_empty());

	running.stop().await;
}

#[tokio::test]
async fn test_stale_processing_order_is_expired_and_notified_once() {
	let config = order_config::ConfigBuilder::new().sweeper(3600, 10).build();
	let running = start(config, Arc::new(FixedOutcome(true))).await;

	let mut order = Order::new(
		"user-1",
		dec!(5),
		Utc::now() - chrono::Duration::minutes(11),
	);
	order.status = OrderStatus::Processing;
	running
		.engine
		.storage()
		.store(StorageKey::Orders.as_str(), &order.id.to_string(), &order)
		.await
		.unwrap();

	let report = running.engine.sweeper().sweep().await.unwrap();
	assert_eq!(report.expired, 1);
	assert_eq!(order_status(&running, order.id).await, Some(OrderStatus::Expired));

	let order_id = order.id;
	eventually("expiry notification", || {
		let engine = &running.engine;
		async move { count_notifications(engine, order_id, NotificationKind::Expired).await == 1 }
	})
	.await;

	// A second sweep finds nothing and records nothing new.
	let report = running.engine.sweeper().sweep().await.unwrap();
	assert_eq!(report.matched, 0);
	assert_eq!(notifications(&running.engine, order_id).await.len(), 1);

	running.stop().await;
}

#[tokio::test]
async fn test_sweeper_wins_race_against_slow_processing() {
	let config = order_config::ConfigBuilder::new()
		.simulated_delay_ms(300)
		.build();
	let running = start(config, Arc::new(FixedOutcome(true))).await;

	let order = Order::new(
		"user-1",
		dec!(5),
		Utc::now() - chrono::Duration::minutes(11),
	);
	running
		.engine
		.storage()
		.store(StorageKey::Orders.as_str(), &order.id.to_string(), &order)
		.await
		.unwrap();
	let order_id = order.id;
	running
		.engine
		.channel()
		.publish(OrderEvent::Created { order_id })
		.await
		.unwrap();

	eventually("processing started", || {
		let running = &running;
		async move { order_status(running, order_id).await == Some(OrderStatus::Processing) }
	})
	.await;
	let report = running.engine.sweeper().sweep().await.unwrap();
	assert_eq!(report.expired, 1);

	eventually("expiry notification", || {
		let engine = &running.engine;
		async move { count_notifications(engine, order_id, NotificationKind::Expired).await == 1 }
	})
	.await;
	tokio::time::sleep(std::time::Duration::from_millis(500)).await;

	assert_eq!(order_status(&running, order_id).await, Some(OrderStatus::Expired));
	assert_eq!(
		count_notifications(&running.engine, order_id, NotificationKind::Completed).await,
		0
	);

	running.stop().await;
}

#[tokio::test]
async fn test_unavailable_channel_parks_created_event() {
	let widget = product(dec!(1), 10);
	let running = start(
		config_with(std::slice::from_ref(&widget)).build(),
		Arc::new(FixedOutcome(true)),
	)
	.await;
	wait_for_catalog(&running.engine, std::slice::from_ref(&widget)).await;

	running.engine.channel().close();
	let created = running
		.engine
		.orders()
		.create_order(
			"user-1",
			&[OrderLine {
				product_id: widget.id,
				quantity: 1,
			}],
		)
		.await
		.unwrap();
	assert!(matches!(created.publish, PublishReceipt::Parked { .. }));

	// The committed order stands.
	assert_eq!(
		order_status(&running, created.order.id).await,
		Some(OrderStatus::Pending)
	);
	let parked = running.engine.channel().dead_letters().await.unwrap();
	assert_eq!(parked.len(), 1);
	assert_eq!(
		parked[0].event,
		OrderEvent::Created {
			order_id: created.order.id
		}
	);
	assert!(parked[0].subscriber.is_none());

	running.stop().await;
}
