//! Order persistence.
//!
//! [`OrderStore`] is the contract the lifecycle engine relies on: plain reads,
//! inserts that assign identifiers, and an atomic conditional state update.
//! [`StorageOrderStore`] implements it on top of the key-value
//! [`StorageService`].

use async_trait::async_trait;
use chrono::Utc;
use order_storage::{StorageError, StorageService};
use order_types::{NewOrder, Order, OrderId, OrderState, StorageKey};
use std::sync::Arc;
use thiserror::Error;

/// Name of the sequence that hands out order ids.
const ORDER_SEQUENCE: &str = "orders";

/// Upper bound on compare-and-swap rounds for a single store call.
const MAX_WRITE_ATTEMPTS: usize = 16;

/// Errors returned by an [`OrderStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
	#[error("Order not found: {order_id}")]
	NotFound { order_id: OrderId },
	#[error("Order {order_id} is {actual}, expected {expected}")]
	Conflict {
		order_id: OrderId,
		expected: OrderState,
		actual: OrderState,
	},
	#[error("Store unavailable: {0}")]
	Unavailable(String),
}

/// Persistence contract for orders.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
	/// Loads an order by id.
	async fn get(&self, order_id: OrderId) -> Result<Order, StoreError>;

	/// Persists a new order under the next free id.
	async fn insert(&self, order: NewOrder) -> Result<Order, StoreError>;

	/// Inserts or overwrites an order under its own id.
	async fn save(&self, order: &Order) -> Result<Order, StoreError>;

	/// Sets the state of an order to `target` if it is still `expected`.
	///
	/// The check and the write happen as one atomic step. Returns
	/// [`StoreError::Conflict`] when the stored state differs from `expected`.
	async fn update_state(
		&self,
		order_id: OrderId,
		expected: OrderState,
		target: OrderState,
	) -> Result<Order, StoreError>;
}

/// [`OrderStore`] backed by a [`StorageService`].
///
/// Orders live under `orders:<id>`; ids come from the `sequences:orders`
/// record and start at 1.
pub struct StorageOrderStore {
	storage: Arc<StorageService>,
}

impl StorageOrderStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	async fn load(&self, order_id: OrderId) -> Result<Order, StoreError> {
		self.storage
			.retrieve(StorageKey::Orders.as_str(), &order_id.to_string())
			.await
			.map_err(|e| map_storage_error(order_id, e))
	}
}

fn map_storage_error(order_id: OrderId, error: StorageError) -> StoreError {
	match error {
		StorageError::NotFound => StoreError::NotFound { order_id },
		other => StoreError::Unavailable(other.to_string()),
	}
}

#[async_trait]
impl OrderStore for StorageOrderStore {
	async fn get(&self, order_id: OrderId) -> Result<Order, StoreError> {
		self.load(order_id).await
	}

	async fn insert(&self, order: NewOrder) -> Result<Order, StoreError> {
		for _ in 0..MAX_WRITE_ATTEMPTS {
			let id = self
				.storage
				.next_sequence(StorageKey::Sequences.as_str(), ORDER_SEQUENCE)
				.await
				.map_err(|e| StoreError::Unavailable(e.to_string()))?;
			let created = order.clone().into_order(OrderId(id));

			// An explicit save may already occupy this id; skip past it.
			let inserted = self
				.storage
				.compare_and_swap(StorageKey::Orders.as_str(), &id.to_string(), None, &created)
				.await
				.map_err(|e| StoreError::Unavailable(e.to_string()))?;
			if inserted {
				return Ok(created);
			}
			tracing::debug!(order_id = id, "Order id already taken, advancing sequence");
		}

		Err(StoreError::Unavailable(format!(
			"No free order id after {} attempts",
			MAX_WRITE_ATTEMPTS
		)))
	}

	async fn save(&self, order: &Order) -> Result<Order, StoreError> {
		self.storage
			.store(StorageKey::Orders.as_str(), &order.id.to_string(), order)
			.await
			.map_err(|e| StoreError::Unavailable(e.to_string()))?;
		Ok(order.clone())
	}

	async fn update_state(
		&self,
		order_id: OrderId,
		expected: OrderState,
		target: OrderState,
	) -> Result<Order, StoreError> {
		let mut actual = expected;
		for _ in 0..MAX_WRITE_ATTEMPTS {
			let current = self.load(order_id).await?;
			if current.state != expected {
				return Err(StoreError::Conflict {
					order_id,
					expected,
					actual: current.state,
				});
			}

			let updated = current.with_state(target, Utc::now());
			let swapped = self
				.storage
				.compare_and_swap(
					StorageKey::Orders.as_str(),
					&order_id.to_string(),
					Some(&current),
					&updated,
				)
				.await
				.map_err(|e| map_storage_error(order_id, e))?;
			if swapped {
				return Ok(updated);
			}
			actual = current.state;
		}

		// The record kept changing without the state ever moving away from
		// `expected`; report it as a conflict so the caller retries.
		Err(StoreError::Conflict {
			order_id,
			expected,
			actual,
		})
	}
}
