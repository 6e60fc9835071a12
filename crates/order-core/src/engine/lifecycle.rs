//! Lifecycle management for the order engine.
//!
//! Handles initialization and shutdown procedures for the order engine.

use super::{EngineError, OrderEngine};
use crate::recovery::RecoveryReport;

impl OrderEngine {
	/// Restores persisted state before background work starts.
	pub async fn initialize(&self) -> Result<RecoveryReport, EngineError> {
		tracing::info!(service_id = %self.config.service.id, "Initializing order engine");
		self.recovery
			.recover_state()
			.await
			.map_err(|e| EngineError::Recovery(e.to_string()))
	}

	/// Stops the channel from accepting new messages. Called by `run` after
	/// every background task has finished.
	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!("Shutting down order engine");
		self.channel.close();
		Ok(())
	}
}
