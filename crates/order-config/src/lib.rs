//! Configuration module for the order flow system.
//!
//! This module provides structures and utilities for managing service
//! configuration. It supports loading configuration from TOML files and
//! provides validation to ensure all required configuration values are
//! properly set.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files for better organization:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

pub mod builders;
mod loader;

pub use builders::config::ConfigBuilder;

use order_types::Product;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		let message = err.message().to_string();
		ConfigError::Parse(message)
	}
}

/// Main configuration structure for the order flow service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity of this service instance.
	pub service: ServiceConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// Redelivery policy and concurrency of the event channel.
	#[serde(default)]
	pub channel: ChannelConfig,
	/// Settings of the order processing handler.
	#[serde(default)]
	pub processing: ProcessingConfig,
	/// Settings of the expiration sweeper.
	#[serde(default)]
	pub sweeper: SweeperConfig,
	/// External notice transport.
	#[serde(default)]
	pub notifier: NotifierConfig,
	/// Configuration for the HTTP API server.
	pub api: Option<ApiConfig>,
	/// Products seeded into the store at startup.
	#[serde(default)]
	pub catalog: CatalogConfig,
}

/// Configuration specific to the service instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	/// Unique identifier for this service instance.
	pub id: String,
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Redelivery policy of the event channel.
///
/// A failing delivery is retried `immediate_retries` times back to back, then
/// `delayed_retries` times with an exponentially growing pause starting at
/// `retry_delay_ms`, and is finally moved to the dead-letter area.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
	#[serde(default = "default_immediate_retries")]
	pub immediate_retries: u32,
	#[serde(default = "default_delayed_retries")]
	pub delayed_retries: u32,
	#[serde(default = "default_retry_delay_ms")]
	pub retry_delay_ms: u64,
	/// Upper bound on deliveries dispatched concurrently per subscriber.
	#[serde(default = "default_max_concurrent_deliveries")]
	pub max_concurrent_deliveries: usize,
	/// How long a post-commit publish keeps retrying before the event is parked.
	#[serde(default = "default_publish_retry_max_elapsed_ms")]
	pub publish_retry_max_elapsed_ms: u64,
}

impl Default for ChannelConfig {
	fn default() -> Self {
		Self {
			immediate_retries: default_immediate_retries(),
			delayed_retries: default_delayed_retries(),
			retry_delay_ms: default_retry_delay_ms(),
			max_concurrent_deliveries: default_max_concurrent_deliveries(),
			publish_retry_max_elapsed_ms: default_publish_retry_max_elapsed_ms(),
		}
	}
}

impl ChannelConfig {
	pub fn retry_delay(&self) -> Duration {
		Duration::from_millis(self.retry_delay_ms)
	}

	pub fn publish_retry_max_elapsed(&self) -> Duration {
		Duration::from_millis(self.publish_retry_max_elapsed_ms)
	}
}

fn default_immediate_retries() -> u32 {
	3
}

fn default_delayed_retries() -> u32 {
	3
}

fn default_retry_delay_ms() -> u64 {
	10_000
}

fn default_max_concurrent_deliveries() -> usize {
	100
}

fn default_publish_retry_max_elapsed_ms() -> u64 {
	30_000
}

/// Settings of the order processing handler.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
	/// Simulated processing time between Processing and the outcome draw.
	#[serde(default = "default_simulated_delay_ms")]
	pub simulated_delay_ms: u64,
	/// Probability that a processing attempt succeeds.
	#[serde(default = "default_success_probability")]
	pub success_probability: f64,
}

impl Default for ProcessingConfig {
	fn default() -> Self {
		Self {
			simulated_delay_ms: default_simulated_delay_ms(),
			success_probability: default_success_probability(),
		}
	}
}

impl ProcessingConfig {
	pub fn simulated_delay(&self) -> Duration {
		Duration::from_millis(self.simulated_delay_ms)
	}
}

fn default_simulated_delay_ms() -> u64 {
	5_000
}

fn default_success_probability() -> f64 {
	0.5
}

/// Settings of the expiration sweeper.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweeperConfig {
	/// Time between sweep runs.
	#[serde(default = "default_sweep_interval_seconds")]
	pub interval_seconds: u64,
	/// Age after which a Processing order is expired.
	#[serde(default = "default_timeout_minutes")]
	pub timeout_minutes: u64,
}

impl Default for SweeperConfig {
	fn default() -> Self {
		Self {
			interval_seconds: default_sweep_interval_seconds(),
			timeout_minutes: default_timeout_minutes(),
		}
	}
}

impl SweeperConfig {
	pub fn interval(&self) -> Duration {
		Duration::from_secs(self.interval_seconds)
	}

	/// Saturates instead of overflowing; `Config::validate` rejects values
	/// whose conversion to seconds would overflow.
	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_minutes.saturating_mul(60))
	}
}

fn default_sweep_interval_seconds() -> u64 {
	60
}

fn default_timeout_minutes() -> u64 {
	10
}

/// Configuration of the external notice transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifierConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of notifier implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

impl Default for NotifierConfig {
	fn default() -> Self {
		Self {
			primary: "log".to_string(),
			implementations: HashMap::from([(
				"log".to_string(),
				toml::Value::Table(toml::Table::new()),
			)]),
		}
	}
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// CORS configuration.
	pub cors: Option<CorsConfig>,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
	/// Allowed origins for CORS.
	pub allowed_origins: Vec<String>,
}

/// Returns the default API host.
fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

/// Returns the default API port.
fn default_api_port() -> u16 {
	3000
}

/// Products seeded into the store when absent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CatalogConfig {
	#[serde(default)]
	pub products: Vec<Product>,
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let var_name = var_name.as_str();
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name) {
			Ok(v) => v,
			Err(_) => match default_value {
				Some(default) => default.to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name
					)))
				},
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply replacements in reverse order to maintain positions
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

impl Config {
	/// Loads configuration from a file with environment variable resolution.
	///
	/// This method supports modular configuration through include directives:
	/// - `include = ["file1.toml", "file2.toml"]` - Include specific files
	///
	/// Each top-level section must be unique across all configuration files.
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path_buf = path.as_ref();
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path_buf.display())))?;
		loader.load_config(file_name).await
	}

	/// Validates the configuration to ensure all required fields are properly set.
	///
	/// Beyond per-section checks, the sweeper timeout must strictly exceed the
	/// simulated processing delay so a healthy in-flight order is never expired.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.service.id.trim().is_empty() {
			return Err(ConfigError::Validation("Service ID cannot be empty".into()));
		}

		validate_primary("storage", &self.storage.primary, &self.storage.implementations)?;
		validate_primary(
			"notifier",
			&self.notifier.primary,
			&self.notifier.implementations,
		)?;

		if self.channel.max_concurrent_deliveries == 0 {
			return Err(ConfigError::Validation(
				"channel.max_concurrent_deliveries must be greater than 0".into(),
			));
		}

		let probability = self.processing.success_probability;
		if !(0.0..=1.0).contains(&probability) {
			return Err(ConfigError::Validation(format!(
				"processing.success_probability must be within [0, 1], got {}",
				probability
			)));
		}

		if self.sweeper.interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"sweeper.interval_seconds must be greater than 0".into(),
			));
		}
		if self.sweeper.timeout_minutes.checked_mul(60).is_none() {
			return Err(ConfigError::Validation(format!(
				"sweeper.timeout_minutes is too large: {}",
				self.sweeper.timeout_minutes
			)));
		}
		if self.sweeper.timeout() <= self.processing.simulated_delay() {
			return Err(ConfigError::Validation(format!(
				"sweeper.timeout_minutes ({} min) must exceed processing.simulated_delay_ms ({} ms)",
				self.sweeper.timeout_minutes, self.processing.simulated_delay_ms
			)));
		}

		let mut seen = HashSet::new();
		for product in &self.catalog.products {
			if !seen.insert(product.id) {
				return Err(ConfigError::Validation(format!(
					"Duplicate catalog product {}",
					product.id
				)));
			}
			if product.price.is_sign_negative() {
				return Err(ConfigError::Validation(format!(
					"Catalog product {} has a negative price",
					product.id
				)));
			}
		}

		Ok(())
	}
}

fn validate_primary(
	section: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
) -> Result<(), ConfigError> {
	if implementations.is_empty() {
		return Err(ConfigError::Validation(format!(
			"At least one {} implementation must be configured",
			section
		)));
	}
	if primary.is_empty() {
		return Err(ConfigError::Validation(format!(
			"{} primary implementation cannot be empty",
			section
		)));
	}
	if !implementations.contains_key(primary) {
		return Err(ConfigError::Validation(format!(
			"Primary {} '{}' not found in implementations",
			section, primary
		)));
	}
	Ok(())
}

/// Parses a TOML string, resolving environment variables and validating the
/// result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rust_decimal_macros::dec;

	const MINIMAL: &str = r#"
[service]
id = "order-flow"

[storage]
primary = "memory"
[storage.implementations.memory]
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("ORDER_TEST_HOST", "localhost");
		std::env::set_var("ORDER_TEST_PORT", "5432");

		let input = "host = \"${ORDER_TEST_HOST}:${ORDER_TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "host = \"localhost:5432\"");

		std::env::remove_var("ORDER_TEST_HOST");
		std::env::remove_var("ORDER_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${ORDER_MISSING_VAR:-default_value}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "value = \"default_value\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let input = "value = \"${ORDER_MISSING_VAR}\"";
		let result = resolve_env_vars(input);
		assert!(result.is_err());
		assert!(result.unwrap_err().to_string().contains("ORDER_MISSING_VAR"));
	}

	#[test]
	fn test_defaults_applied() {
		let config: Config = MINIMAL.parse().unwrap();

		assert_eq!(config.service.id, "order-flow");
		assert_eq!(config.processing.simulated_delay(), Duration::from_secs(5));
		assert_eq!(config.processing.success_probability, 0.5);
		assert_eq!(config.sweeper.interval(), Duration::from_secs(60));
		assert_eq!(config.sweeper.timeout(), Duration::from_secs(600));
		assert_eq!(config.channel.immediate_retries, 3);
		assert_eq!(config.channel.delayed_retries, 3);
		assert_eq!(config.notifier.primary, "log");
		assert!(config.api.is_none());
		assert!(config.catalog.products.is_empty());
	}

	#[test]
	fn test_catalog_products_parsed() {
		let config_str = format!(
			"{}{}",
			MINIMAL,
			r#"
[[catalog.products]]
id = "6f1c7d3e-8a55-4b7e-9b59-1c2f1b9b7a01"
name = "Widget"
price = "10.99"
stock = 100
"#
		);
		let config: Config = config_str.parse().unwrap();

		assert_eq!(config.catalog.products.len(), 1);
		assert_eq!(config.catalog.products[0].price, dec!(10.99));
		assert_eq!(config.catalog.products[0].stock, 100);
	}

	#[test]
	fn test_timeout_must_exceed_processing_delay() {
		let config_str = format!(
			"{}{}",
			MINIMAL,
			r#"
[processing]
simulated_delay_ms = 600000

[sweeper]
timeout_minutes = 10
"#
		);
		let result: Result<Config, _> = config_str.parse();
		assert!(result.unwrap_err().to_string().contains("must exceed"));
	}

	#[test]
	fn test_oversized_timeout_rejected() {
		let config_str = format!(
			"{}{}",
			MINIMAL,
			r#"
[sweeper]
timeout_minutes = 400000000000000000
"#
		);
		let result: Result<Config, _> = config_str.parse();
		assert!(result.unwrap_err().to_string().contains("too large"));
	}

	#[test]
	fn test_unknown_primary_rejected() {
		let config_str = r#"
[service]
id = "order-flow"

[storage]
primary = "file"
[storage.implementations.memory]
"#;
		let result: Result<Config, _> = config_str.parse();
		assert!(result
			.unwrap_err()
			.to_string()
			.contains("Primary storage 'file' not found"));
	}

	#[test]
	fn test_success_probability_bounds() {
		let config_str = format!("{}\n[processing]\nsuccess_probability = 1.5\n", MINIMAL);
		let result: Result<Config, _> = config_str.parse();
		assert!(result.is_err());
	}

	#[test]
	fn test_duplicate_catalog_product_rejected() {
		let product = r#"
[[catalog.products]]
id = "6f1c7d3e-8a55-4b7e-9b59-1c2f1b9b7a01"
price = "1.00"
stock = 1
"#;
		let config_str = format!("{}{}{}", MINIMAL, product, product);
		let result: Result<Config, _> = config_str.parse();
		assert!(result.unwrap_err().to_string().contains("Duplicate catalog"));
	}
}
