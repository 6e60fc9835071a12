//! The order engine: owns the wired components and runs the background work.
//!
//! [`OrderEngine::run`] recovers persisted state, starts one consumer task per
//! channel subscriber plus the expiration sweeper, and returns once the
//! shutdown token is cancelled and all in-flight work has drained.

pub mod lifecycle;

use crate::monitoring::ExpirationSweeper;
use crate::recovery::RecoveryService;
use crate::service::OrderService;
use crate::state::OrderStateMachine;
use order_channel::{Consumer, EventChannel};
use order_config::Config;
use order_storage::StorageService;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Service error: {0}")]
	Service(String),
	#[error("Recovery error: {0}")]
	Recovery(String),
}

#[derive(Clone)]
pub struct OrderEngine {
	pub(crate) config: Config,
	pub(crate) storage: Arc<StorageService>,
	pub(crate) channel: EventChannel,
	pub(crate) orders: Arc<OrderService>,
	pub(crate) state_machine: Arc<OrderStateMachine>,
	pub(crate) sweeper: Arc<ExpirationSweeper>,
	pub(crate) recovery: Arc<RecoveryService>,
	/// Consumers registered at build time, taken by the first `run`.
	pub(crate) consumers: Arc<Mutex<Option<Vec<Consumer>>>>,
	/// Cancelled once `run` has recovered state and started its tasks.
	pub(crate) started: CancellationToken,
}

impl OrderEngine {
	#[allow(clippy::too_many_arguments)]
	pub(crate) fn new(
		config: Config,
		storage: Arc<StorageService>,
		channel: EventChannel,
		orders: Arc<OrderService>,
		state_machine: Arc<OrderStateMachine>,
		sweeper: Arc<ExpirationSweeper>,
		recovery: Arc<RecoveryService>,
		consumers: Vec<Consumer>,
	) -> Self {
		Self {
			config,
			storage,
			channel,
			orders,
			state_machine,
			sweeper,
			recovery,
			consumers: Arc::new(Mutex::new(Some(consumers))),
			started: CancellationToken::new(),
		}
	}

	/// Runs the engine until `shutdown` is cancelled.
	///
	/// Orders may be created through [`orders`](Self::orders) before and while
	/// the engine runs. Can only be called once per engine.
	pub async fn run(&self, shutdown: CancellationToken) -> Result<(), EngineError> {
		let consumers = self
			.consumers
			.lock()
			.map_err(|_| EngineError::Service("Consumer registry poisoned".into()))?
			.take()
			.ok_or_else(|| EngineError::Service("Engine is already running".into()))?;

		self.initialize().await?;

		let mut tasks = JoinSet::new();
		for consumer in consumers {
			let token = shutdown.clone();
			tasks.spawn(async move { consumer.run(token).await });
		}
		{
			let sweeper = self.sweeper.clone();
			let token = shutdown.clone();
			tasks.spawn(async move { sweeper.run(token).await });
		}
		tracing::info!(tasks = tasks.len(), "Order engine running");
		self.started.cancel();

		shutdown.cancelled().await;
		tracing::info!("Shutdown requested; waiting for in-flight work");

		while let Some(joined) = tasks.join_next().await {
			if let Err(e) = joined {
				tracing::error!(error = %e, "Background task failed");
			}
		}

		self.shutdown().await
	}

	/// Resolves once `run` has finished recovery and started its background
	/// tasks. Never resolves if recovery fails.
	pub async fn ready(&self) {
		self.started.cancelled().await
	}

	pub fn is_ready(&self) -> bool {
		self.started.is_cancelled()
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn channel(&self) -> &EventChannel {
		&self.channel
	}

	pub fn orders(&self) -> &Arc<OrderService> {
		&self.orders
	}

	pub fn state_machine(&self) -> &Arc<OrderStateMachine> {
		&self.state_machine
	}

	pub fn sweeper(&self) -> &Arc<ExpirationSweeper> {
		&self.sweeper
	}
}
