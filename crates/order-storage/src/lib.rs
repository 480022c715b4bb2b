//! Storage module for the order lifecycle service.
//!
//! This module provides abstractions for persisting order data behind a
//! key-value interface, with in-memory and file-based backends. Backends
//! expose an atomic compare-and-swap primitive on which conditional updates
//! and id sequences are built.

use async_trait::async_trait;
use order_types::ImplementationRegistry;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Upper bound on compare-and-swap rounds when advancing a sequence.
const MAX_SEQUENCE_ATTEMPTS: usize = 64;

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

/// Trait defining the low-level interface for storage backends.
///
/// This trait must be implemented by any storage backend that wants to
/// integrate with the order service. It provides basic key-value operations
/// plus an atomic conditional write.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes, overwriting any previous value.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Atomically replaces the value under `key` with `value` if the current
	/// value equals `expected`.
	///
	/// `expected = None` means the key must be absent. Returns `Ok(false)`
	/// without writing when the precondition does not hold.
	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError>;
}

/// Type alias for storage factory functions.
///
/// This is the function signature that all storage implementations must provide
/// to create instances of their storage interface.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples for all available storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// High-level storage service that provides typed operations.
///
/// The StorageService wraps a low-level storage backend and provides
/// convenient methods for storing and retrieving typed data with
/// automatic JSON serialization.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
		serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Stores a serializable value, creating or overwriting it.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes = Self::encode(data)?;
		self.backend.set_bytes(&Self::key(namespace, id), bytes).await
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}

	/// Updates an existing value in storage.
	///
	/// Unlike `store`, this returns `NotFound` if the key doesn't exist.
	pub async fn update<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let key = Self::key(namespace, id);
		if !self.backend.exists(&key).await? {
			return Err(StorageError::NotFound);
		}
		self.backend.set_bytes(&key, Self::encode(data)?).await
	}

	/// Checks if a value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}

	/// Atomically replaces `expected` with `data`.
	///
	/// Both values are compared in their serialized form, so `expected` must be
	/// the exact value previously read from storage. Returns `Ok(false)` when
	/// another writer got there first.
	pub async fn compare_and_swap<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		expected: Option<&T>,
		data: &T,
	) -> Result<bool, StorageError> {
		let expected = expected.map(|value| Self::encode(value)).transpose()?;
		self.backend
			.compare_and_swap(&Self::key(namespace, id), expected.as_deref(), Self::encode(data)?)
			.await
	}

	/// Advances the named sequence and returns the new value.
	///
	/// Sequences start at 1 and never hand out the same value twice, even
	/// under concurrent callers.
	pub async fn next_sequence(&self, namespace: &str, name: &str) -> Result<u64, StorageError> {
		for _ in 0..MAX_SEQUENCE_ATTEMPTS {
			let current: Option<u64> = match self.retrieve(namespace, name).await {
				Ok(value) => Some(value),
				Err(StorageError::NotFound) => None,
				Err(e) => return Err(e),
			};
			let next = current.unwrap_or(0) + 1;
			if self
				.compare_and_swap(namespace, name, current.as_ref(), &next)
				.await?
			{
				return Ok(next);
			}
			tracing::debug!(sequence = %name, "Sequence contended, retrying");
		}

		Err(StorageError::Backend(format!(
			"Sequence '{}' contended for {} attempts",
			name, MAX_SEQUENCE_ATTEMPTS
		)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryStorage;
	use std::sync::Arc;

	fn service() -> StorageService {
		StorageService::new(Box::new(MemoryStorage::new()))
	}

	#[tokio::test]
	async fn test_typed_store_and_retrieve() {
		let storage = service();

		storage.store("orders", "1", &vec![1u8, 2, 3]).await.unwrap();
		let value: Vec<u8> = storage.retrieve("orders", "1").await.unwrap();
		assert_eq!(value, vec![1, 2, 3]);

		let missing: Result<Vec<u8>, _> = storage.retrieve("orders", "2").await;
		assert!(matches!(missing, Err(StorageError::NotFound)));
	}

	#[tokio::test]
	async fn test_update_requires_existing_key() {
		let storage = service();

		let result = storage.update("orders", "1", &"value").await;
		assert!(matches!(result, Err(StorageError::NotFound)));

		storage.store("orders", "1", &"value").await.unwrap();
		storage.update("orders", "1", &"other").await.unwrap();
		let value: String = storage.retrieve("orders", "1").await.unwrap();
		assert_eq!(value, "other");
	}

	#[tokio::test]
	async fn test_compare_and_swap_typed() {
		let storage = service();

		assert!(storage
			.compare_and_swap("orders", "1", None, &"first")
			.await
			.unwrap());
		// Key now exists, so "must be absent" no longer holds.
		assert!(!storage
			.compare_and_swap("orders", "1", None, &"second")
			.await
			.unwrap());
		assert!(!storage
			.compare_and_swap("orders", "1", Some(&"stale"), &"second")
			.await
			.unwrap());
		assert!(storage
			.compare_and_swap("orders", "1", Some(&"first"), &"second")
			.await
			.unwrap());

		let value: String = storage.retrieve("orders", "1").await.unwrap();
		assert_eq!(value, "second");
	}

	#[tokio::test]
	async fn test_next_sequence_starts_at_one() {
		let storage = service();

		assert_eq!(storage.next_sequence("sequences", "orders").await.unwrap(), 1);
		assert_eq!(storage.next_sequence("sequences", "orders").await.unwrap(), 2);
		assert_eq!(storage.next_sequence("sequences", "other").await.unwrap(), 1);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_next_sequence_is_unique_under_contention() {
		let storage = Arc::new(service());

		let mut handles = Vec::new();
		for _ in 0..16 {
			let storage = storage.clone();
			handles.push(tokio::spawn(async move {
				storage.next_sequence("sequences", "orders").await.unwrap()
			}));
		}

		let mut values = Vec::new();
		for handle in handles {
			values.push(handle.await.unwrap());
		}
		values.sort_unstable();
		assert_eq!(values, (1..=16).collect::<Vec<u64>>());
	}
}
