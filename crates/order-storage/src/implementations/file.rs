//! File-based storage backend implementation.
//!
//! Each key is stored as its own JSON file under a base directory. Writes go
//! to a temporary file first and are renamed into place, so readers never
//! observe a partially written record.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use order_types::ImplementationRegistry;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Default directory used when no `storage_path` is configured.
const DEFAULT_STORAGE_PATH: &str = "./data/orders";

/// Options accepted under `[storage.implementations.file]`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileStorageConfig {
	storage_path: Option<String>,
}

/// File-based storage implementation.
///
/// Mutations are serialized through an in-process lock so that
/// compare-and-swap is atomic with respect to every other write made through
/// the same instance.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
	/// Serializes writers.
	write_lock: Mutex<()>,
}

impl FileStorage {
	/// Creates a new FileStorage instance rooted at `base_path`.
	pub fn new(base_path: PathBuf) -> Self {
		Self {
			base_path,
			write_lock: Mutex::new(()),
		}
	}

	/// Returns the directory this backend writes to.
	pub fn base_path(&self) -> &Path {
		&self.base_path
	}

	/// Converts a storage key to a filesystem-safe file path.
	fn get_file_path(&self, key: &str) -> PathBuf {
		let safe_key = key.replace(['/', '\\', ':'], "_");
		self.base_path.join(format!("{}.json", safe_key))
	}

	async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
		match fs::read(path).await {
			Ok(data) => Ok(Some(data)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	/// Writes atomically by writing to a temp file then renaming.
	async fn write_file(&self, path: &Path, value: Vec<u8>) -> Result<(), StorageError> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, value)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.read_file(&self.get_file_path(key))
			.await?
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		self.write_file(&self.get_file_path(key), value).await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		match fs::remove_file(self.get_file_path(key)).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		fs::try_exists(self.get_file_path(key))
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let _guard = self.write_lock.lock().await;
		let path = self.get_file_path(key);

		let current = self.read_file(&path).await?;
		if current.as_deref() != expected {
			return Ok(false);
		}

		self.write_file(&path, value).await?;
		Ok(true)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/orders")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	let options: FileStorageConfig = config
		.clone()
		.try_into()
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = options
		.storage_path
		.unwrap_or_else(|| DEFAULT_STORAGE_PATH.to_string());
	if storage_path.trim().is_empty() {
		return Err(StorageError::Configuration(
			"storage_path cannot be empty".into(),
		));
	}

	tracing::debug!(path = %storage_path, "Using file storage");
	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
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

	#[tokio::test]
	async fn test_basic_operations() {
		let temp_dir = TempDir::new().unwrap();
		let storage = FileStorage::new(temp_dir.path().to_path_buf());

		let key = "orders:1";
		storage.set_bytes(key, b"{}".to_vec()).await.unwrap();
		assert_eq!(storage.get_bytes(key).await.unwrap(), b"{}".to_vec());
		assert!(storage.exists(key).await.unwrap());
		assert!(temp_dir.path().join("orders_1.json").exists());

		storage.delete(key).await.unwrap();
		assert!(!storage.exists(key).await.unwrap());
		assert!(matches!(
			storage.get_bytes(key).await,
			Err(StorageError::NotFound)
		));

		// Deleting a missing key is not an error.
		storage.delete(key).await.unwrap();
	}

	#[tokio::test]
	async fn test_compare_and_swap() {
		let temp_dir = TempDir::new().unwrap();
		let storage = FileStorage::new(temp_dir.path().to_path_buf());
		let key = "orders:1";

		assert!(storage
			.compare_and_swap(key, None, b"v1".to_vec())
			.await
			.unwrap());
		assert!(!storage
			.compare_and_swap(key, None, b"v2".to_vec())
			.await
			.unwrap());
		assert!(!storage
			.compare_and_swap(key, Some(b"stale".as_slice()), b"v2".to_vec())
			.await
			.unwrap());
		assert!(storage
			.compare_and_swap(key, Some(b"v1".as_slice()), b"v2".to_vec())
			.await
			.unwrap());
		assert_eq!(storage.get_bytes(key).await.unwrap(), b"v2".to_vec());
	}

	#[tokio::test]
	async fn test_data_survives_new_instance() {
		let temp_dir = TempDir::new().unwrap();

		let first = FileStorage::new(temp_dir.path().to_path_buf());
		first.set_bytes("orders:5", b"persisted".to_vec()).await.unwrap();
		drop(first);

		let second = FileStorage::new(temp_dir.path().to_path_buf());
		assert_eq!(
			second.get_bytes("orders:5").await.unwrap(),
			b"persisted".to_vec()
		);
	}

	#[test]
	fn test_factory_config() {
		let temp_dir = TempDir::new().unwrap();
		let mut table = toml::map::Map::new();
		table.insert(
			"storage_path".into(),
			toml::Value::String(temp_dir.path().display().to_string()),
		);
		assert!(create_storage(&toml::Value::Table(table)).is_ok());

		let mut unknown = toml::map::Map::new();
		unknown.insert("ttl_orders".into(), toml::Value::Integer(60));
		assert!(matches!(
			create_storage(&toml::Value::Table(unknown)),
			Err(StorageError::Configuration(_))
		));

		let mut empty_path = toml::map::Map::new();
		empty_path.insert("storage_path".into(), toml::Value::String(" ".into()));
		assert!(matches!(
			create_storage(&toml::Value::Table(empty_path)),
			Err(StorageError::Configuration(_))
		));
	}
}
