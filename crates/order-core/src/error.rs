//! Errors surfaced by the order service.

use crate::state::{InterceptorError, TransitionError};
use crate::store::StoreError;
use order_types::{OrderEvent, OrderId, OrderState};
use thiserror::Error;

/// Outcome of a failed order operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
	#[error("Order not found: {order_id}")]
	OrderNotFound { order_id: OrderId },
	#[error("Illegal transition: {event} is not allowed in state {from}")]
	IllegalTransition { from: OrderState, event: OrderEvent },
	#[error("Order {order_id} was modified concurrently ({attempts} attempts)")]
	ConcurrentModification { order_id: OrderId, attempts: u32 },
	#[error("Store unavailable: {0}")]
	StoreUnavailable(String),
	#[error("Transition rejected: {0}")]
	Interceptor(String),
}

impl OperationError {
	/// Returns true when the caller caused the failure, as opposed to the
	/// infrastructure.
	pub fn is_rejection(&self) -> bool {
		!matches!(self, Self::StoreUnavailable(_))
	}
}

impl From<StoreError> for OperationError {
	fn from(err: StoreError) -> Self {
		match err {
			StoreError::NotFound { order_id } => Self::OrderNotFound { order_id },
			StoreError::Conflict { order_id, .. } => Self::ConcurrentModification {
				order_id,
				attempts: 1,
			},
			StoreError::Unavailable(message) => Self::StoreUnavailable(message),
		}
	}
}

impl From<TransitionError> for OperationError {
	fn from(err: TransitionError) -> Self {
		match err {
			TransitionError::IllegalTransition { from, event } => {
				Self::IllegalTransition { from, event }
			},
			TransitionError::Rejected {
				reason: InterceptorError::Store(store_error),
				..
			} => store_error.into(),
			TransitionError::Rejected {
				interceptor,
				reason: InterceptorError::Vetoed(message),
				..
			} => Self::Interceptor(format!("{}: {}", interceptor, message)),
		}
	}
}
