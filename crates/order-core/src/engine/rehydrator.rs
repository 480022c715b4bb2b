//! Rebuilds a state machine from the store for a single event.
//!
//! No machine outlives a call. Each operation loads the order, positions a
//! fresh machine at the persisted state, applies the event and lets the
//! persistence hook write the result with a conditional update. A lost
//! conditional write restarts the whole sequence against a fresh read.

use crate::error::OperationError;
use crate::state::{
	EventContext, InterceptorError, OrderStateMachine, TransitionContext, TransitionError,
	TransitionInterceptor, TransitionTable,
};
use crate::store::OrderStore;
use async_trait::async_trait;
use order_config::MAX_TRANSITION_RETRIES_LIMIT;
use order_types::{Order, OrderEvent, OrderId};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Pre-transition hook that commits the new state to the store.
///
/// The write happens before the machine moves, so a failed or conflicting
/// write vetoes the transition and leaves the machine where it was.
struct PersistenceInterceptor {
	store: Arc<dyn OrderStore>,
	written: Mutex<Option<Order>>,
}

impl PersistenceInterceptor {
	fn new(store: Arc<dyn OrderStore>) -> Self {
		Self {
			store,
			written: Mutex::new(None),
		}
	}

	async fn take_written(&self) -> Option<Order> {
		self.written.lock().await.take()
	}
}

#[async_trait]
impl TransitionInterceptor for PersistenceInterceptor {
	fn name(&self) -> &'static str {
		"persistence"
	}

	async fn pre_transition(&self, context: &TransitionContext) -> Result<(), InterceptorError> {
		let order = self
			.store
			.update_state(context.order_id, context.from, context.to)
			.await?;
		*self.written.lock().await = Some(order);
		Ok(())
	}
}

/// Applies events to persisted orders.
pub struct Rehydrator {
	table: Arc<TransitionTable>,
	store: Arc<dyn OrderStore>,
	interceptors: Vec<Arc<dyn TransitionInterceptor>>,
	max_retries: u32,
}

impl Rehydrator {
	/// Creates a rehydrator that re-attempts a conflicting transition up to
	/// `max_retries` times, capped at [`MAX_TRANSITION_RETRIES_LIMIT`].
	pub fn new(table: Arc<TransitionTable>, store: Arc<dyn OrderStore>, max_retries: u32) -> Self {
		if max_retries > MAX_TRANSITION_RETRIES_LIMIT {
			tracing::warn!(
				requested = max_retries,
				limit = MAX_TRANSITION_RETRIES_LIMIT,
				"Transition retries capped"
			);
		}
		Self {
			table,
			store,
			interceptors: Vec::new(),
			max_retries: max_retries.min(MAX_TRANSITION_RETRIES_LIMIT),
		}
	}

	/// Registers an interceptor on every machine this rehydrator builds.
	pub fn with_interceptor(mut self, interceptor: Arc<dyn TransitionInterceptor>) -> Self {
		self.interceptors.push(interceptor);
		self
	}

	/// Loads `order_id`, applies `event` and returns the order as written.
	pub async fn for_order(
		&self,
		order_id: OrderId,
		event: OrderEvent,
		context: EventContext,
	) -> Result<Order, OperationError> {
		let max_attempts = self.max_retries.saturating_add(1);
		let mut attempt = 0;
		loop {
			attempt += 1;
			match self.attempt(order_id, event, context.clone()).await {
				Err(OperationError::ConcurrentModification { .. }) if attempt < max_attempts => {
					tracing::debug!(%order_id, %event, attempt, "Conditional write lost, retrying");
				},
				Err(OperationError::ConcurrentModification { .. }) => {
					tracing::warn!(%order_id, %event, attempts = attempt, "Giving up after repeated conflicts");
					return Err(OperationError::ConcurrentModification {
						order_id,
						attempts: attempt,
					});
				},
				Err(OperationError::IllegalTransition { from, event }) => {
					tracing::warn!(%order_id, %from, %event, "Transition rejected");
					return Err(OperationError::IllegalTransition { from, event });
				},
				other => return other,
			}
		}
	}

	async fn attempt(
		&self,
		order_id: OrderId,
		event: OrderEvent,
		context: EventContext,
	) -> Result<Order, OperationError> {
		let order = self.store.get(order_id).await?;

		let mut machine = OrderStateMachine::rehydrate(order_id, self.table.clone(), order.state);
		for interceptor in &self.interceptors {
			machine.add_interceptor(interceptor.clone());
		}
		// Registered last so that any veto happens before the write.
		let persistence = Arc::new(PersistenceInterceptor::new(self.store.clone()));
		machine.add_interceptor(persistence.clone());

		tracing::debug!(%order_id, state = %order.state, %event, "Rehydrated state machine");

		machine.apply(event, context).await.map_err(|err| {
			if let TransitionError::Rejected { .. } = err {
				tracing::debug!(%order_id, error = %err, "Transition aborted");
			}
			OperationError::from(err)
		})?;

		persistence.take_written().await.ok_or_else(|| {
			OperationError::StoreUnavailable(format!(
				"Transition of order {} committed without a stored record",
				order_id
			))
		})
	}
}
