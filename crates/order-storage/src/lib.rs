//! Storage module for the order flow system.
//!
//! This module provides the persistent store behind orders, products and
//! notifications. Backends implement a small key-value [`StorageInterface`]
//! with an atomic batch write; [`StorageService`] layers typed access, simple
//! field queries and transactional units of work on top of it.
//!
//! All writes are serialized through one writer lock. A [`UnitOfWork`] holds
//! that lock from `begin` until it is committed or dropped, buffers its writes
//! and applies them as a single atomic batch, so a read-check-write sequence
//! inside one unit of work cannot interleave with another writer.

use async_trait::async_trait;
use order_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// A single write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum WriteOp {
	Put { key: String, value: Vec<u8> },
	Delete { key: String },
}

/// Trait defining the low-level interface for storage backends.
///
/// Keys have the form `namespace:id`.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists the ids stored under a namespace, without the namespace prefix.
	async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StorageError>;

	/// Applies every write in `batch` or none of them.
	async fn apply_batch(&self, batch: Vec<WriteOp>) -> Result<(), StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Field filter applied to the JSON form of stored records.
#[derive(Debug, Clone)]
pub enum QueryFilter {
	/// Matches every record.
	All,
	/// Field equals the value.
	Equals(String, serde_json::Value),
	/// Field is one of the values.
	In(String, Vec<serde_json::Value>),
}

impl QueryFilter {
	fn matches(&self, record: &serde_json::Value) -> bool {
		match self {
			QueryFilter::All => true,
			QueryFilter::Equals(field, value) => record.get(field) == Some(value),
			QueryFilter::In(field, values) => record
				.get(field)
				.is_some_and(|actual| values.contains(actual)),
		}
	}
}

fn make_key(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

fn to_bytes<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
	serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// High-level storage service that provides typed, transactional operations.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
	/// Serializes every write path.
	writer: Mutex<()>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self {
			backend,
			writer: Mutex::new(()),
		}
	}

	/// Opens a unit of work. Other writers wait until it is committed or
	/// dropped; dropping it without commit discards its writes.
	pub async fn begin(&self) -> UnitOfWork<'_> {
		UnitOfWork {
			backend: self.backend.as_ref(),
			_guard: self.writer.lock().await,
			pending: BTreeMap::new(),
		}
	}

	/// Stores a serializable value, creating or overwriting it.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let mut uow = self.begin().await;
		uow.put(namespace, id, data)?;
		uow.commit().await
	}

	/// Retrieves and deserializes a value. Fails with `NotFound` when absent.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&make_key(namespace, id)).await?;
		from_bytes(&bytes)
	}

	/// Like [`retrieve`](Self::retrieve) but maps `NotFound` to `None`.
	pub async fn retrieve_optional<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Removes a value. Removing a missing key is not an error.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		let mut uow = self.begin().await;
		uow.delete(namespace, id);
		uow.commit().await
	}

	/// Checks if a value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&make_key(namespace, id)).await
	}

	/// Returns every record of a namespace whose JSON form matches `filter`,
	/// together with its id. Records deleted while the query runs are skipped.
	pub async fn query<T: DeserializeOwned>(
		&self,
		namespace: &str,
		filter: QueryFilter,
	) -> Result<Vec<(String, T)>, StorageError> {
		let mut results = Vec::new();
		for id in self.backend.list_keys(namespace).await? {
			let bytes = match self.backend.get_bytes(&make_key(namespace, &id)).await {
				Ok(bytes) => bytes,
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			};
			let record: serde_json::Value = from_bytes(&bytes)?;
			if filter.matches(&record) {
				let value = serde_json::from_value(record)
					.map_err(|e| StorageError::Serialization(e.to_string()))?;
				results.push((id, value));
			}
		}
		Ok(results)
	}
}

/// A transactional scope over the store.
///
/// Reads see the unit's own pending writes first, then committed state.
/// Acquired per handler invocation and never shared between tasks.
pub struct UnitOfWork<'a> {
	backend: &'a dyn StorageInterface,
	_guard: MutexGuard<'a, ()>,
	/// `None` marks a pending delete.
	pending: BTreeMap<String, Option<Vec<u8>>>,
}

impl UnitOfWork<'_> {
	/// Reads a value, returning `None` when it does not exist.
	pub async fn get<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		let key = make_key(namespace, id);
		if let Some(pending) = self.pending.get(&key) {
			return pending.as_deref().map(from_bytes::<T>).transpose();
		}
		match self.backend.get_bytes(&key).await {
			Ok(bytes) => from_bytes(&bytes).map(Some),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Buffers a write of `data` under `namespace:id`.
	pub fn put<T: Serialize>(
		&mut self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes = to_bytes(data)?;
		self.pending.insert(make_key(namespace, id), Some(bytes));
		Ok(())
	}

	/// Buffers a delete of `namespace:id`.
	pub fn delete(&mut self, namespace: &str, id: &str) {
		self.pending.insert(make_key(namespace, id), None);
	}

	/// Applies all buffered writes as one atomic batch and releases the
	/// writer lock.
	pub async fn commit(self) -> Result<(), StorageError> {
		if self.pending.is_empty() {
			return Ok(());
		}
		let batch = self
			.pending
			.into_iter()
			.map(|(key, value)| match value {
				Some(value) => WriteOp::Put { key, value },
				None => WriteOp::Delete { key },
			})
			.collect();
		self.backend.apply_batch(batch).await
	}
}
