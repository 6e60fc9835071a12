//! File-based storage backend.
//!
//! Each record lives in `<storage_path>/<namespace>/<id>.json`. Single files
//! are replaced atomically (write to a temp file, then rename). A batch is
//! first written to a journal file; the journal is applied and then removed,
//! and a journal left behind by a crash is replayed when the storage opens, so
//! a batch is either fully applied or not at all.
//!
//! The storage directory is locked with an exclusive advisory lock for the
//! lifetime of the backend so two processes never write to it concurrently.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry, WriteOp};
use async_trait::async_trait;
use fs2::FileExt;
use order_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, StorageKey, ValidationError,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const JOURNAL_FILE: &str = "batch.journal";
const LOCK_FILE: &str = ".lock";

/// File-based storage implementation.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
	/// Held for the lifetime of the backend; the lock is released on drop.
	_lock: File,
	/// Serializes journal writes.
	journal: Mutex<()>,
}

impl FileStorage {
	/// Opens (and creates if needed) a storage directory, replaying any
	/// journal left by an interrupted batch.
	pub fn open(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
		let base_path = base_path.into();
		std::fs::create_dir_all(&base_path).map_err(backend_err)?;
		for namespace in StorageKey::all() {
			std::fs::create_dir_all(base_path.join(namespace.as_str())).map_err(backend_err)?;
		}

		let lock = File::create(base_path.join(LOCK_FILE)).map_err(backend_err)?;
		lock.try_lock_exclusive().map_err(|e| {
			StorageError::Backend(format!(
				"Storage directory {} is locked by another process: {}",
				base_path.display(),
				e
			))
		})?;

		let storage = Self {
			base_path,
			_lock: lock,
			journal: Mutex::new(()),
		};
		storage.replay_journal()?;
		Ok(storage)
	}

	/// Converts a `namespace:id` key into its file path.
	fn get_file_path(&self, key: &str) -> Result<PathBuf, StorageError> {
		let (namespace, id) = key
			.split_once(':')
			.ok_or_else(|| StorageError::Backend(format!("Malformed key: {}", key)))?;
		Ok(self.namespace_dir(namespace)?.join(format!("{}.json", sanitize(id))))
	}

	fn namespace_dir(&self, namespace: &str) -> Result<PathBuf, StorageError> {
		let namespace = namespace
			.parse::<StorageKey>()
			.map_err(|_| StorageError::Backend(format!("Unknown namespace: {}", namespace)))?;
		Ok(self.base_path.join(namespace.as_str()))
	}

	fn journal_path(&self) -> PathBuf {
		self.base_path.join(JOURNAL_FILE)
	}

	/// Resolves every key of a batch to its file before anything is written,
	/// so a malformed key rejects the whole batch. `None` marks a delete.
	fn resolve<'b>(
		&self,
		batch: &'b [WriteOp],
	) -> Result<Vec<(PathBuf, Option<&'b [u8]>)>, StorageError> {
		batch
			.iter()
			.map(|op| match op {
				WriteOp::Put { key, value } => Ok((self.get_file_path(key)?, Some(value.as_slice()))),
				WriteOp::Delete { key } => Ok((self.get_file_path(key)?, None)),
			})
			.collect()
	}

	fn read_journal(data: &[u8]) -> Result<Vec<WriteOp>, StorageError> {
		serde_json::from_slice(data)
			.map_err(|e| StorageError::Serialization(format!("Corrupt journal: {}", e)))
	}

	/// Applies and removes a journal left over from a crash.
	fn replay_journal(&self) -> Result<(), StorageError> {
		let path = self.journal_path();
		let data = match std::fs::read(&path) {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
			Err(e) => return Err(backend_err(e)),
		};
		let batch = Self::read_journal(&data)?;

		tracing::warn!(writes = batch.len(), "Replaying interrupted storage batch");
		for (file, value) in self.resolve(&batch)? {
			match value {
				Some(data) => write_atomic_sync(&file, data)?,
				None => remove_if_exists_sync(&file)?,
			}
		}
		std::fs::remove_file(&path).map_err(backend_err)
	}

	/// Finishes a batch whose journal is still on disk after a failed apply.
	/// Callers hold the journal lock.
	async fn roll_forward(&self) -> Result<(), StorageError> {
		let path = self.journal_path();
		let data = match fs::read(&path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
			Err(e) => return Err(backend_err(e)),
		};
		let batch = Self::read_journal(&data)?;

		tracing::warn!(writes = batch.len(), "Rolling forward unfinished storage batch");
		apply_resolved(&self.resolve(&batch)?).await?;
		fs::remove_file(&path).await.map_err(backend_err)
	}
}

async fn apply_resolved(ops: &[(PathBuf, Option<&[u8]>)]) -> Result<(), StorageError> {
	for (path, value) in ops {
		match value {
			Some(data) => write_atomic(path, data).await?,
			None => match fs::remove_file(path).await {
				Ok(_) => {},
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
				Err(e) => return Err(backend_err(e)),
			},
		}
	}
	Ok(())
}

fn backend_err(e: std::io::Error) -> StorageError {
	StorageError::Backend(e.to_string())
}

/// Makes an id filesystem-safe.
fn sanitize(id: &str) -> String {
	id.replace(['/', '\\', ':'], "_")
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
	let temp_path = path.with_extension("tmp");
	fs::write(&temp_path, data).await.map_err(backend_err)?;
	fs::rename(&temp_path, path).await.map_err(backend_err)
}

fn write_atomic_sync(path: &Path, data: &[u8]) -> Result<(), StorageError> {
	let temp_path = path.with_extension("tmp");
	std::fs::write(&temp_path, data).map_err(backend_err)?;
	std::fs::rename(&temp_path, path).map_err(backend_err)
}

fn remove_if_exists_sync(path: &Path) -> Result<(), StorageError> {
	match std::fs::remove_file(path) {
		Ok(_) => Ok(()),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
		Err(e) => Err(backend_err(e)),
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.get_file_path(key)?;
		match fs::read(&path).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(backend_err(e)),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let path = self.get_file_path(key)?;
		fs::try_exists(&path).await.map_err(backend_err)
	}

	async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let dir = self.namespace_dir(namespace)?;
		let mut entries = fs::read_dir(&dir).await.map_err(backend_err)?;

		let mut ids = Vec::new();
		while let Some(entry) = entries.next_entry().await.map_err(backend_err)? {
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new("json")) {
				continue;
			}
			if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
				ids.push(stem.to_string());
			}
		}
		ids.sort();
		Ok(ids)
	}

	async fn apply_batch(&self, batch: Vec<WriteOp>) -> Result<(), StorageError> {
		let _journal = self.journal.lock().await;
		// Nothing new is written while an earlier batch is only partly applied.
		self.roll_forward().await?;

		let ops = self.resolve(&batch)?;
		if ops.len() == 1 {
			// One file rename is already atomic.
			return apply_resolved(&ops).await;
		}

		let journal =
			serde_json::to_vec(&batch).map_err(|e| StorageError::Serialization(e.to_string()))?;
		write_atomic(&self.journal_path(), &journal).await?;

		if let Err(e) = apply_resolved(&ops).await {
			tracing::error!(error = %e, "Storage batch failed part way; rolling forward");
			return self.roll_forward().await;
		}

		fs::remove_file(self.journal_path()).await.map_err(backend_err)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new("storage_path", FieldType::String).with_validator(|v| {
				match v.as_str() {
					Some(s) if !s.trim().is_empty() => Ok(()),
					_ => Err("storage_path cannot be empty".to_string()),
				}
			})],
		);
		schema.validate(config)
	}
}

/// Factory function to create a storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/storage")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage");

	Ok(Box::new(FileStorage::open(storage_path)?))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn put(key: &str, value: &[u8]) -> WriteOp {
		WriteOp::Put {
			key: key.to_string(),
			value: value.to_vec(),
		}
	}

	#[tokio::test]
	async fn test_batch_round_trip() {
		let dir = TempDir::new().unwrap();
		let storage = FileStorage::open(dir.path()).unwrap();

		storage
			.apply_batch(vec![put("orders:a", b"{}"), put("products:p", b"[]")])
			.await
			.unwrap();

		assert_eq!(storage.get_bytes("orders:a").await.unwrap(), b"{}".to_vec());
		assert_eq!(storage.list_keys("orders").await.unwrap(), vec!["a"]);
		assert!(!dir.path().join(JOURNAL_FILE).exists());

		storage
			.apply_batch(vec![WriteOp::Delete {
				key: "orders:a".into(),
			}])
			.await
			.unwrap();
		assert!(!storage.exists("orders:a").await.unwrap());
	}

	#[tokio::test]
	async fn test_unknown_namespace_is_rejected() {
		let dir = TempDir::new().unwrap();
		let storage = FileStorage::open(dir.path()).unwrap();
		assert!(matches!(
			storage.get_bytes("quotes:1").await,
			Err(StorageError::Backend(_))
		));
	}

	#[tokio::test]
	async fn test_leftover_journal_is_replayed_on_open() {
		let dir = TempDir::new().unwrap();
		{
			let storage = FileStorage::open(dir.path()).unwrap();
			storage.apply_batch(vec![put("orders:old", b"1")]).await.unwrap();
		}

		// Simulate a crash after the journal was written but before it was applied.
		let batch = vec![
			put("orders:new", b"2"),
			WriteOp::Delete {
				key: "orders:old".into(),
			},
		];
		std::fs::write(
			dir.path().join(JOURNAL_FILE),
			serde_json::to_vec(&batch).unwrap(),
		)
		.unwrap();

		let storage = FileStorage::open(dir.path()).unwrap();
		assert_eq!(storage.list_keys("orders").await.unwrap(), vec!["new"]);
		assert!(!dir.path().join(JOURNAL_FILE).exists());
	}

	#[tokio::test]
	async fn test_batch_with_unknown_namespace_writes_nothing() {
		let dir = TempDir::new().unwrap();
		let storage = FileStorage::open(dir.path()).unwrap();

		let result = storage
			.apply_batch(vec![put("orders:a", b"1"), put("quotes:b", b"2")])
			.await;
		assert!(result.is_err());
		assert!(!storage.exists("orders:a").await.unwrap());
		assert!(!dir.path().join(JOURNAL_FILE).exists());
	}

	#[tokio::test]
	async fn test_failed_batch_is_completed_before_next_write() {
		let dir = TempDir::new().unwrap();
		let storage = FileStorage::open(dir.path()).unwrap();

		// A directory where the second record belongs makes its rename fail.
		let blocker = dir.path().join("orders").join("b.json");
		std::fs::create_dir(&blocker).unwrap();

		let result = storage
			.apply_batch(vec![put("orders:a", b"1"), put("orders:b", b"2")])
			.await;
		assert!(result.is_err());
		assert!(dir.path().join(JOURNAL_FILE).exists());

		// Later batches are refused while the earlier one cannot finish.
		let blocked = storage
			.apply_batch(vec![put("products:p", b"3"), put("products:q", b"4")])
			.await;
		assert!(blocked.is_err());
		assert!(!storage.exists("products:p").await.unwrap());

		std::fs::remove_dir(&blocker).unwrap();
		storage
			.apply_batch(vec![put("products:p", b"3"), put("products:q", b"4")])
			.await
			.unwrap();

		assert_eq!(storage.get_bytes("orders:a").await.unwrap(), b"1".to_vec());
		assert_eq!(storage.get_bytes("orders:b").await.unwrap(), b"2".to_vec());
		assert!(storage.exists("products:q").await.unwrap());
		assert!(!dir.path().join(JOURNAL_FILE).exists());
	}

	#[test]
	fn test_directory_lock_is_exclusive() {
		let dir = TempDir::new().unwrap();
		let _first = FileStorage::open(dir.path()).unwrap();
		assert!(FileStorage::open(dir.path()).is_err());
	}

	#[test]
	fn test_factory_validates_storage_path() {
		let config: toml::Value = toml::from_str("storage_path = \"\"").unwrap();
		assert!(matches!(
			create_storage(&config),
			Err(StorageError::Configuration(_))
		));
	}
}
