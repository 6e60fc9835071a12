//! Main entry point for the order flow service.
//!
//! Loads the configuration, builds the order engine with the registered
//! storage and notifier implementations, and runs it together with the
//! optional HTTP API until interrupted.

use clap::Parser;
use order_config::Config;
use order_core::{EngineFactories, OrderEngine, OrderEngineBuilder};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

mod apis;
mod server;

use order_notify::implementations::log::create_notifier as create_log_notifier;
use order_notify::implementations::webhook::create_notifier as create_webhook_notifier;
use order_storage::implementations::file::create_storage as create_file_storage;
use order_storage::implementations::memory::create_storage as create_memory_storage;

/// Command-line arguments for the order flow service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml", env = "ORDER_FLOW_CONFIG")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started order flow service");

	let config = Config::from_file(&args.config).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let engine = build_engine(config.clone()).await?;

	let shutdown = CancellationToken::new();
	{
		let shutdown = shutdown.clone();
		tokio::spawn(async move {
			if let Err(e) = tokio::signal::ctrl_c().await {
				tracing::error!(error = %e, "Failed to listen for ctrl-c");
				return;
			}
			tracing::info!("Interrupt received");
			shutdown.cancel();
		});
	}

	match config.api.clone().filter(|api| api.enabled) {
		Some(api_config) => {
			let engine_task = async {
				let result = engine.run(shutdown.clone()).await;
				if result.is_err() {
					shutdown.cancel();
				}
				result
			};
			let api_task = async {
				let result =
					server::start_server_when_ready(api_config, engine.clone(), shutdown.clone()).await;
				if result.is_err() {
					shutdown.cancel();
				}
				result
			};

			let (engine_result, api_result) = tokio::join!(engine_task, api_task);
			engine_result?;
			api_result?;
		},
		None => {
			tracing::info!("Starting engine only");
			engine.run(shutdown).await?;
		},
	}

	tracing::info!("Stopped order flow service");
	Ok(())
}

/// Macro to create a factory HashMap with the appropriate type aliases
macro_rules! create_factory_map {
    ($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
        let mut factories = std::collections::HashMap::new();
        $(
            factories.insert(
                $name.to_string(),
                $factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
            );
        )*
        factories
    }};
}

/// Builds the order engine with every registered implementation.
async fn build_engine(config: Config) -> Result<OrderEngine, Box<dyn std::error::Error>> {
	let storage_factories = create_factory_map!(
		order_storage::StorageInterface,
		order_storage::StorageError,
		"file" => create_file_storage,
		"memory" => create_memory_storage,
	);

	let notifier_factories = create_factory_map!(
		order_notify::NotifierInterface,
		order_notify::NotifyError,
		"log" => create_log_notifier,
		"webhook" => create_webhook_notifier,
	);

	let factories = EngineFactories {
		storage_factories,
		notifier_factories,
	};

	Ok(OrderEngineBuilder::new(config).build(factories).await?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use order_config::ConfigBuilder;
	use tempfile::tempdir;

	#[test]
	fn test_args_default_values() {
		let args = Args::parse_from(["order-flow"]);
		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");
	}

	#[test]
	fn test_args_custom_values() {
		let args = Args::parse_from(["order-flow", "-c", "custom.toml", "-l", "debug"]);
		assert_eq!(args.config, PathBuf::from("custom.toml"));
		assert_eq!(args.log_level, "debug");
	}

	#[test]
	fn test_create_factory_map_multiple_entries() {
		let factories = create_factory_map!(
			order_storage::StorageInterface,
			order_storage::StorageError,
			"memory" => create_memory_storage,
			"file" => create_file_storage,
		);

		assert_eq!(factories.len(), 2);
		assert!(factories.contains_key("memory"));
		assert!(factories.contains_key("file"));
	}

	#[tokio::test]
	async fn test_build_engine_with_minimal_config() {
		let config = ConfigBuilder::new().service_id("test-orders").build();
		let engine = build_engine(config).await.unwrap();
		assert_eq!(engine.config().service.id, "test-orders");
	}

	#[tokio::test]
	async fn test_build_engine_with_file_config() {
		let temp_dir = tempdir().unwrap();
		let data_dir = temp_dir.path().join("data");
		let config_path = temp_dir.path().join("config.toml");

		let config_content = format!(
			r#"
[service]
id = "file-orders"

[storage]
primary = "file"
[storage.implementations.file]
storage_path = "{}"

[processing]
simulated_delay_ms = 100

[[catalog.products]]
id = "7b0a7c52-8d39-4d5c-9b59-0c1f1e0f6c11"
name = "Widget"
price = "10.99"
stock = 100
"#,
			data_dir.display()
		);
		std::fs::write(&config_path, config_content).unwrap();

		let config = Config::from_file(&config_path).await.unwrap();
		assert_eq!(config.catalog.products.len(), 1);

		let engine = build_engine(config).await.unwrap();
		assert_eq!(engine.config().service.id, "file-orders");
		assert!(data_dir.exists());
	}
}
