//! Configuration builder for tests and embedded use.

use crate::{
	ApiConfig, CatalogConfig, ChannelConfig, Config, NotifierConfig, ProcessingConfig,
	ServiceConfig, StorageConfig, SweeperConfig,
};
use order_types::Product;
use std::collections::HashMap;

/// Builder for creating `Config` instances with a fluent API.
///
/// Defaults use in-memory storage and the log notifier, with no delay and
/// immediate redelivery so tests run fast.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	service_id: String,
	storage_primary: String,
	storage_config: toml::Value,
	channel: ChannelConfig,
	processing: ProcessingConfig,
	sweeper: SweeperConfig,
	api: Option<ApiConfig>,
	products: Vec<Product>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		Self {
			service_id: "test-service".to_string(),
			storage_primary: "memory".to_string(),
			storage_config: toml::Value::Table(toml::Table::new()),
			channel: ChannelConfig {
				retry_delay_ms: 10,
				publish_retry_max_elapsed_ms: 100,
				..ChannelConfig::default()
			},
			processing: ProcessingConfig {
				simulated_delay_ms: 0,
				success_probability: 1.0,
			},
			sweeper: SweeperConfig::default(),
			api: None,
			products: Vec::new(),
		}
	}

	pub fn service_id(mut self, id: impl Into<String>) -> Self {
		self.service_id = id.into();
		self
	}

	/// Sets the primary storage implementation and its table.
	pub fn storage(mut self, primary: impl Into<String>, config: toml::Value) -> Self {
		self.storage_primary = primary.into();
		self.storage_config = config;
		self
	}

	pub fn channel(mut self, channel: ChannelConfig) -> Self {
		self.channel = channel;
		self
	}

	pub fn simulated_delay_ms(mut self, delay: u64) -> Self {
		self.processing.simulated_delay_ms = delay;
		self
	}

	pub fn success_probability(mut self, probability: f64) -> Self {
		self.processing.success_probability = probability;
		self
	}

	pub fn sweeper(mut self, interval_seconds: u64, timeout_minutes: u64) -> Self {
		self.sweeper = SweeperConfig {
			interval_seconds,
			timeout_minutes,
		};
		self
	}

	pub fn api(mut self, api: Option<ApiConfig>) -> Self {
		self.api = api;
		self
	}

	/// Adds a product to the seeded catalog.
	pub fn product(mut self, product: Product) -> Self {
		self.products.push(product);
		self
	}

	pub fn build(self) -> Config {
		Config {
			service: ServiceConfig {
				id: self.service_id,
			},
			storage: StorageConfig {
				implementations: HashMap::from([(
					self.storage_primary.clone(),
					self.storage_config,
				)]),
				primary: self.storage_primary,
			},
			channel: self.channel,
			processing: self.processing,
			sweeper: self.sweeper,
			notifier: NotifierConfig::default(),
			api: self.api,
			catalog: CatalogConfig {
				products: self.products,
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rust_decimal_macros::dec;
	use uuid::Uuid;

	#[test]
	fn test_built_config_is_valid() {
		let config = ConfigBuilder::new()
			.service_id("orders-it")
			.product(Product {
				id: Uuid::new_v4(),
				name: "Widget".into(),
				price: dec!(10.99),
				stock: 100,
			})
			.build();

		config.validate().unwrap();
		assert_eq!(config.service.id, "orders-it");
		assert!(config.storage.implementations.contains_key("memory"));
		assert_eq!(config.catalog.products.len(), 1);
	}

	#[test]
	fn test_sweeper_override() {
		let config = ConfigBuilder::new().sweeper(1, 2).build();
		assert_eq!(config.sweeper.interval_seconds, 1);
		assert_eq!(config.sweeper.timeout_minutes, 2);
	}
}
