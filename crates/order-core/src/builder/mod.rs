//! Builder for wiring an [`OrderService`] from configuration.
//!
//! Storage backends are instantiated through factory functions looked up by
//! the implementation names found in the configuration.

use crate::engine::{event_bus::EventBus, OrderService};
use crate::state::{TransitionInterceptor, TransitionTable, TransitionTableError};
use crate::store::StorageOrderStore;
use order_config::Config;
use order_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while assembling the order service.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Invalid transition table: {0}")]
	Table(#[from] TransitionTableError),
}

/// Builder for constructing an [`OrderService`] with a pluggable store.
pub struct OrderServiceBuilder {
	config: Config,
	interceptors: Vec<Arc<dyn TransitionInterceptor>>,
	event_capacity: usize,
}

impl OrderServiceBuilder {
	/// Creates a new builder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self {
			config,
			interceptors: Vec::new(),
			event_capacity: crate::engine::event_bus::DEFAULT_EVENT_CAPACITY,
		}
	}

	/// Adds an interceptor to every transition.
	pub fn with_interceptor(mut self, interceptor: Arc<dyn TransitionInterceptor>) -> Self {
		self.interceptors.push(interceptor);
		self
	}

	/// Sets how many lifecycle events a slow subscriber may lag behind.
	pub fn with_event_capacity(mut self, capacity: usize) -> Self {
		self.event_capacity = capacity;
		self
	}

	/// Builds the service, creating storage through `storage_factories`.
	pub fn build<SF>(self, storage_factories: HashMap<String, SF>) -> Result<OrderService, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
	{
		let mut storage_impls = HashMap::new();
		for (name, config) in &self.config.storage.implementations {
			let Some(factory) = storage_factories.get(name) else {
				tracing::warn!(component = "storage", implementation = %name, "No factory registered, skipping");
				continue;
			};
			match factory(config) {
				Ok(implementation) => {
					storage_impls.insert(name.clone(), implementation);
					let is_primary = &self.config.storage.primary == name;
					tracing::info!(component = "storage", implementation = %name, enabled = %is_primary, "Loaded");
				},
				Err(e) => {
					tracing::error!(
						component = "storage",
						implementation = %name,
						error = %e,
						"Failed to create storage implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create storage implementation '{}': {}",
						name, e
					)));
				},
			}
		}

		let primary_storage = &self.config.storage.primary;
		let storage_backend = storage_impls.remove(primary_storage).ok_or_else(|| {
			BuilderError::Config(format!(
				"Primary storage '{}' failed to load or has no registered factory",
				primary_storage
			))
		})?;

		let storage = Arc::new(StorageService::new(storage_backend));
		let store = Arc::new(StorageOrderStore::new(storage));
		let table = TransitionTable::order_lifecycle()?;

		tracing::info!(
			service_id = %self.config.service.id,
			max_transition_retries = self.config.service.max_transition_retries,
			"Order service ready"
		);

		Ok(OrderService::with_interceptors(
			store,
			table,
			EventBus::new(self.event_capacity),
			self.config.service.max_transition_retries,
			self.interceptors,
		))
	}
}
