//! External notice transport for the order flow system.
//!
//! Notices are best effort: callers log a failed send and carry on. The
//! transport is pluggable; `log` writes a structured tracing line and
//! `webhook` POSTs the notice as JSON.

use async_trait::async_trait;
use order_types::{ConfigSchema, ImplementationRegistry, NotificationKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Re-export implementations
pub mod implementations {
	pub mod log;
	pub mod webhook;
}

/// Errors that can occur while sending a notice.
#[derive(Debug, Error)]
pub enum NotifyError {
	/// The notice could not be transmitted.
	#[error("Transport error: {0}")]
	Transport(String),
	/// The receiver answered with a non-success status.
	#[error("Notice rejected with status {0}")]
	Rejected(u16),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// A notice about a terminal order, addressed to the order owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
	pub order_id: Uuid,
	pub owner_id: String,
	pub kind: NotificationKind,
	pub message: String,
}

/// Trait implemented by notice transports.
#[async_trait]
pub trait NotifierInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Sends one notice.
	async fn send(&self, notice: &Notice) -> Result<(), NotifyError>;
}

/// Type alias for notifier factory functions.
pub type NotifierFactory = fn(&toml::Value) -> Result<Box<dyn NotifierInterface>, NotifyError>;

/// Registry trait for notifier implementations.
pub trait NotifierRegistry: ImplementationRegistry<Factory = NotifierFactory> {}

/// Get all registered notifier implementations.
pub fn get_all_implementations() -> Vec<(&'static str, NotifierFactory)> {
	use implementations::{log, webhook};

	vec![
		(log::Registry::NAME, log::Registry::factory()),
		(webhook::Registry::NAME, webhook::Registry::factory()),
	]
}

/// Service wrapper around the configured transport.
pub struct NotifyService {
	notifier: Box<dyn NotifierInterface>,
}

impl NotifyService {
	pub fn new(notifier: Box<dyn NotifierInterface>) -> Self {
		Self { notifier }
	}

	/// Sends a notice through the configured transport.
	pub async fn notify(&self, notice: &Notice) -> Result<(), NotifyError> {
		self.notifier.send(notice).await
	}
}
