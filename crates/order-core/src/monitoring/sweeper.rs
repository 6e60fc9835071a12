//! Expiration sweeper for orders stuck in processing.
//!
//! Periodically expires every Processing order older than the configured
//! timeout and publishes `OrderExpired` for each one it wins.

use crate::publish::PostCommitPublisher;
use crate::state::{OrderStateMachine, TransitionOutcome};
use chrono::{DateTime, Utc};
use order_storage::{QueryFilter, StorageService};
use order_types::{truncate_id, Order, OrderEvent, OrderStatus, StorageKey};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SweepError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Invalid timeout: {0}")]
	InvalidTimeout(String),
}

/// Summary of one sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
	/// Processing orders older than the cutoff.
	pub matched: usize,
	/// Orders this run moved to Expired.
	pub expired: usize,
	/// Orders whose expiry failed; retried on the next run.
	pub failed: usize,
}

pub struct ExpirationSweeper {
	storage: Arc<StorageService>,
	state_machine: Arc<OrderStateMachine>,
	publisher: Arc<PostCommitPublisher>,
	interval: Duration,
	timeout: Duration,
}

impl ExpirationSweeper {
	pub fn new(
		storage: Arc<StorageService>,
		state_machine: Arc<OrderStateMachine>,
		publisher: Arc<PostCommitPublisher>,
		interval: Duration,
		timeout: Duration,
	) -> Self {
		Self {
			storage,
			state_machine,
			publisher,
			interval,
			timeout,
		}
	}

	/// Runs one sweep with the current wall-clock time.
	pub async fn sweep(&self) -> Result<SweepReport, SweepError> {
		self.sweep_at(Utc::now()).await
	}

	/// Runs one sweep treating `now` as the current time.
	///
	/// Each order is expired in its own unit of work and its event published
	/// after that commit. A failure on one order does not stop the run.
	pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, SweepError> {
		let timeout = chrono::Duration::from_std(self.timeout)
			.map_err(|e| SweepError::InvalidTimeout(e.to_string()))?;
		let Some(cutoff) = now.checked_sub_signed(timeout) else {
			return Ok(SweepReport::default());
		};

		let processing = serde_json::to_value(OrderStatus::Processing)
			.map_err(|e| SweepError::Storage(e.to_string()))?;
		let candidates: Vec<(String, Order)> = self
			.storage
			.query(
				StorageKey::Orders.as_str(),
				QueryFilter::Equals("status".to_string(), processing),
			)
			.await
			.map_err(|e| SweepError::Storage(e.to_string()))?;

		let mut report = SweepReport::default();
		for (_, order) in candidates {
			if order.status != OrderStatus::Processing || order.created_at >= cutoff {
				continue;
			}
			report.matched += 1;

			match self
				.state_machine
				.transition(order.id, OrderStatus::Processing, OrderStatus::Expired)
				.await
			{
				Ok(TransitionOutcome::Applied(_)) => {
					tracing::info!(
						order_id = %truncate_id(&order.id.to_string()),
						age_minutes = (now - order.created_at).num_minutes(),
						"Order expired"
					);
					report.expired += 1;
					self.publisher
						.publish(OrderEvent::Expired { order_id: order.id })
						.await;
				},
				Ok(TransitionOutcome::Skipped { current }) => {
					tracing::debug!(
						order_id = %truncate_id(&order.id.to_string()),
						status = ?current,
						"Order changed before expiry"
					);
				},
				Err(e) => {
					tracing::error!(
						order_id = %truncate_id(&order.id.to_string()),
						error = %e,
						"Failed to expire order"
					);
					report.failed += 1;
				},
			}
		}
		Ok(report)
	}

	/// Sweeps every interval until `shutdown` is cancelled.
	///
	/// The first sweep happens one interval after start. A sweep in progress
	/// finishes before the loop observes the shutdown.
	pub async fn run(&self, shutdown: CancellationToken) {
		let mut ticker =
			tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		tracing::info!(
			interval_secs = self.interval.as_secs(),
			timeout_secs = self.timeout.as_secs(),
			"Expiration sweeper started"
		);

		loop {
			tokio::select! {
				biased;
				_ = shutdown.cancelled() => break,
				_ = ticker.tick() => {
					match self.sweep().await {
						Ok(report) if report.matched > 0 => {
							tracing::info!(
								matched = report.matched,
								expired = report.expired,
								failed = report.failed,
								"Sweep finished"
							);
						},
						Ok(_) => {},
						Err(e) => tracing::error!(error = %e, "Sweep failed"),
					}
				}
			}
		}

		tracing::info!("Expiration sweeper stopped");
	}
}
