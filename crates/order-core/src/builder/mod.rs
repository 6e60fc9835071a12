//! Builder pattern for constructing order engines.
//!
//! Composes an [`OrderEngine`] from a [`Config`] and factory maps for the
//! pluggable storage and notifier implementations. Channel subscriptions are
//! registered here, before the engine is returned, so events published by
//! the first orders always find their subscribers.

use crate::engine::OrderEngine;
use crate::handlers::{NotificationRecorder, ProcessingHandler};
use crate::monitoring::ExpirationSweeper;
use crate::outcome::{OutcomeSource, RandomOutcome};
use crate::publish::PostCommitPublisher;
use crate::recovery::RecoveryService;
use crate::service::OrderService;
use crate::state::OrderStateMachine;
use order_channel::{EventChannel, RedeliveryPolicy};
use order_config::Config;
use order_notify::{NotifierInterface, NotifyError, NotifyService};
use order_storage::{StorageError, StorageInterface, StorageService};
use order_types::EventKind;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Subscriber name of the processing handler.
pub const PROCESSING_SUBSCRIBER: &str = "processing";
/// Subscriber name of the notification recorder.
pub const NOTIFICATION_SUBSCRIBER: &str = "notifications";

/// Errors that can occur during order engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for every pluggable component, keyed by implementation name.
pub struct EngineFactories<SF, NF> {
	pub storage_factories: HashMap<String, SF>,
	pub notifier_factories: HashMap<String, NF>,
}

/// Builder for constructing an OrderEngine with pluggable implementations.
pub struct OrderEngineBuilder {
	config: Config,
	outcome: Option<Arc<dyn OutcomeSource>>,
}

impl OrderEngineBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			outcome: None,
		}
	}

	/// Replaces the random processing outcome, mainly for tests.
	pub fn with_outcome_source(mut self, outcome: Arc<dyn OutcomeSource>) -> Self {
		self.outcome = Some(outcome);
		self
	}

	/// Builds the OrderEngine using the factories for each component type.
	pub async fn build<SF, NF>(
		self,
		factories: EngineFactories<SF, NF>,
	) -> Result<OrderEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		NF: Fn(&toml::Value) -> Result<Box<dyn NotifierInterface>, NotifyError>,
	{
		let config = self.config;

		let storage_backend = load_primary(
			"storage",
			&config.storage.primary,
			&config.storage.implementations,
			&factories.storage_factories,
		)?;
		let storage = Arc::new(StorageService::new(storage_backend));

		let notifier = load_primary(
			"notifier",
			&config.notifier.primary,
			&config.notifier.implementations,
			&factories.notifier_factories,
		)?;
		let notify = Arc::new(NotifyService::new(notifier));

		let policy = RedeliveryPolicy {
			immediate_retries: config.channel.immediate_retries,
			delayed_retries: config.channel.delayed_retries,
			retry_delay: config.channel.retry_delay(),
		};
		let channel = EventChannel::new(
			storage.clone(),
			policy,
			config.channel.max_concurrent_deliveries,
		);
		let publisher = Arc::new(PostCommitPublisher::new(
			Arc::new(channel.clone()),
			channel.dead_letter_area().clone(),
			config.channel.publish_retry_max_elapsed(),
		));

		let state_machine = Arc::new(OrderStateMachine::new(storage.clone()));
		let outcome = self.outcome.unwrap_or_else(|| {
			Arc::new(RandomOutcome::new(config.processing.success_probability))
		});

		let processing = Arc::new(ProcessingHandler::new(
			state_machine.clone(),
			publisher.clone(),
			outcome,
			config.processing.simulated_delay(),
		));
		let recorder = Arc::new(NotificationRecorder::new(storage.clone(), notify));

		let consumers = vec![
			channel
				.subscribe(PROCESSING_SUBSCRIBER, [EventKind::OrderCreated], processing)
				.await
				.map_err(|e| BuilderError::Config(e.to_string()))?,
			channel
				.subscribe(
					NOTIFICATION_SUBSCRIBER,
					[EventKind::OrderCompleted, EventKind::OrderExpired],
					recorder,
				)
				.await
				.map_err(|e| BuilderError::Config(e.to_string()))?,
		];

		let orders = Arc::new(OrderService::new(storage.clone(), publisher.clone()));
		let sweeper = Arc::new(ExpirationSweeper::new(
			storage.clone(),
			state_machine.clone(),
			publisher.clone(),
			config.sweeper.interval(),
			config.sweeper.timeout(),
		));
		let recovery = Arc::new(RecoveryService::new(
			storage.clone(),
			channel.clone(),
			publisher,
			config.catalog.products.clone(),
		));

		Ok(OrderEngine::new(
			config,
			storage,
			channel,
			orders,
			state_machine,
			sweeper,
			recovery,
			consumers,
		))
	}
}

/// Creates the configured implementations of one component and returns the
/// primary one. Every configured implementation with a known factory is
/// built, so a broken secondary table still fails startup.
fn load_primary<T: ?Sized, E: std::fmt::Display, F>(
	component: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
) -> Result<Box<T>, BuilderError>
where
	F: Fn(&toml::Value) -> Result<Box<T>, E>,
{
	let mut loaded = HashMap::new();
	for (name, config) in implementations {
		let Some(factory) = factories.get(name) else {
			tracing::warn!(component, implementation = %name, "No factory registered; skipping");
			continue;
		};
		match factory(config) {
			Ok(implementation) => {
				let is_primary = primary == name;
				tracing::info!(component, implementation = %name, enabled = %is_primary, "Loaded");
				loaded.insert(name.clone(), implementation);
			},
			Err(e) => {
				tracing::error!(
					component,
					implementation = %name,
					error = %e,
					"Failed to create implementation"
				);
				return Err(BuilderError::Config(format!(
					"Failed to create {} implementation '{}': {}",
					component, name, e
				)));
			},
		}
	}

	loaded.remove(primary).ok_or_else(|| {
		BuilderError::MissingComponent(format!(
			"Primary {} '{}' failed to load or has no factory",
			component, primary
		))
	})
}
