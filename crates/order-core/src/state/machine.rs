//! Per-order state machine.
//!
//! A machine holds the current state of one order and evaluates events
//! against a shared [`TransitionTable`]. It performs no I/O of its own;
//! registered interceptors are the only side-effect seam.

use super::interceptor::{InterceptorError, TransitionInterceptor};
use super::table::TransitionTable;
use order_types::{OrderEvent, OrderId, OrderState};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by [`OrderStateMachine::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
	#[error("Event {event} is not accepted in state {from}")]
	IllegalTransition { from: OrderState, event: OrderEvent },
	#[error("Transition {from} -> {to} on {event} rejected by {interceptor}: {reason}")]
	Rejected {
		from: OrderState,
		to: OrderState,
		event: OrderEvent,
		interceptor: &'static str,
		#[source]
		reason: InterceptorError,
	},
}

/// Optional key/value payload carried alongside an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventContext {
	values: HashMap<String, String>,
}

impl EventContext {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the context with `key` set to `value`.
	pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.values.insert(key.into(), value.into());
		self
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.values.get(key).map(String::as_str)
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}
}

/// Everything an interceptor knows about the transition in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionContext {
	pub order_id: OrderId,
	pub from: OrderState,
	pub to: OrderState,
	pub event: OrderEvent,
	pub context: EventContext,
}

/// State machine for a single order.
pub struct OrderStateMachine {
	order_id: OrderId,
	table: Arc<TransitionTable>,
	current: OrderState,
	interceptors: Vec<Arc<dyn TransitionInterceptor>>,
}

impl OrderStateMachine {
	/// Creates a machine in the table's initial state.
	pub fn new(order_id: OrderId, table: Arc<TransitionTable>) -> Self {
		let initial = table.initial();
		Self::rehydrate(order_id, table, initial)
	}

	/// Creates a machine positioned at a persisted state.
	///
	/// No transition is evaluated and no interceptor runs.
	pub fn rehydrate(order_id: OrderId, table: Arc<TransitionTable>, state: OrderState) -> Self {
		Self {
			order_id,
			table,
			current: state,
			interceptors: Vec::new(),
		}
	}

	/// Registers an interceptor. Interceptors run in registration order.
	pub fn add_interceptor(&mut self, interceptor: Arc<dyn TransitionInterceptor>) {
		self.interceptors.push(interceptor);
	}

	pub fn order_id(&self) -> OrderId {
		self.order_id
	}

	pub fn current_state(&self) -> OrderState {
		self.current
	}

	/// Applies `event` to the current state.
	///
	/// On an undeclared `(state, event)` pair, or when a pre hook vetoes, the
	/// state is left untouched and an error is returned.
	pub async fn apply(
		&mut self,
		event: OrderEvent,
		context: EventContext,
	) -> Result<OrderState, TransitionError> {
		let from = self.current;
		let to = self
			.table
			.lookup(from, event)
			.ok_or(TransitionError::IllegalTransition { from, event })?;

		let transition = TransitionContext {
			order_id: self.order_id,
			from,
			to,
			event,
			context,
		};

		for interceptor in &self.interceptors {
			if let Err(reason) = interceptor.pre_transition(&transition).await {
				tracing::debug!(
					order_id = %self.order_id,
					interceptor = interceptor.name(),
					error = %reason,
					"Transition vetoed"
				);
				return Err(TransitionError::Rejected {
					from,
					to,
					event,
					interceptor: interceptor.name(),
					reason,
				});
			}
		}

		self.current = to;

		for interceptor in &self.interceptors {
			interceptor.post_transition(&transition).await;
		}

		Ok(to)
	}
}
