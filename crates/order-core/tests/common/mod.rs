#![allow(dead_code)]

use order_config::{Config, ConfigBuilder};
use order_core::{EngineFactories, OrderEngine, OrderEngineBuilder, OutcomeSource};
use order_notify::NotifierFactory;
use order_storage::{QueryFilter, StorageFactory};
use order_types::{Notification, NotificationKind, Product, StorageKey};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub fn storage_factories() -> HashMap<String, StorageFactory> {
	order_storage::get_all_implementations()
		.into_iter()
		.map(|(name, factory)| (name.to_string(), factory))
		.collect()
}

pub fn notifier_factories() -> HashMap<String, NotifierFactory> {
	order_notify::get_all_implementations()
		.into_iter()
		.map(|(name, factory)| (name.to_string(), factory))
		.collect()
}

pub fn product(price: Decimal, stock: u32) -> Product {
	Product {
		id: Uuid::new_v4(),
		name: "Widget".to_string(),
		price,
		stock,
	}
}

/// A built engine running in the background.
pub struct Running {
	pub engine: OrderEngine,
	pub shutdown: CancellationToken,
	pub task: JoinHandle<Result<(), order_core::EngineError>>,
}

impl Running {
	pub async fn stop(self) {
		self.shutdown.cancel();
		self.task.await.unwrap().unwrap();
	}
}

pub async fn start(config: Config, outcome: Arc<dyn OutcomeSource>) -> Running {
	let engine = OrderEngineBuilder::new(config)
		.with_outcome_source(outcome)
		.build(EngineFactories {
			storage_factories: storage_factories(),
			notifier_factories: notifier_factories(),
		})
		.await
		.unwrap();
	spawn(engine)
}

pub fn spawn(engine: OrderEngine) -> Running {
	let shutdown = CancellationToken::new();
	let task = {
		let engine = engine.clone();
		let shutdown = shutdown.clone();
		tokio::spawn(async move { engine.run(shutdown).await })
	};
	Running {
		engine,
		shutdown,
		task,
	}
}

pub fn config_with(products: &[Product]) -> ConfigBuilder {
	products
		.iter()
		.cloned()
		.fold(ConfigBuilder::new(), |builder, p| builder.product(p))
}

/// Polls `check` until it returns true or five seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
	F: FnMut() -> Fut,
	Fut: Future<Output = bool>,
{
	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
	loop {
		if check().await {
			return;
		}
		if tokio::time::Instant::now() >= deadline {
			panic!("timed out waiting for {}", what);
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
}

pub async fn wait_for_catalog(engine: &OrderEngine, products: &[Product]) {
	for product in products {
		let id = product.id;
		eventually("catalog seeding", || async move {
			matches!(engine.orders().get_product(id).await, Ok(Some(_)))
		})
		.await;
	}
}

pub async fn notifications(engine: &OrderEngine, order_id: Uuid) -> Vec<Notification> {
	engine
		.storage()
		.query::<Notification>(
			StorageKey::Notifications.as_str(),
			QueryFilter::Equals(
				"order_id".to_string(),
				serde_json::Value::String(order_id.to_string()),
			),
		)
		.await
		.unwrap()
		.into_iter()
		.map(|(_, n)| n)
		.collect()
}

pub async fn count_notifications(
	engine: &OrderEngine,
	order_id: Uuid,
	kind: NotificationKind,
) -> usize {
	notifications(engine, order_id)
		.await
		.iter()
		.filter(|n| n.kind == kind)
		.count()
}
