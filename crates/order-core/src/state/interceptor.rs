//! Hooks around state transitions.
//!
//! Interceptors are the only place a transition may cause side effects. Pre
//! hooks run before the machine changes state and can veto the transition;
//! post hooks observe a transition that has already taken effect.

use super::machine::TransitionContext;
use crate::engine::event_bus::EventBus;
use crate::store::StoreError;
use async_trait::async_trait;
use order_types::LifecycleEvent;
use thiserror::Error;

/// Reasons a pre-transition hook refuses a transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterceptorError {
	#[error("Vetoed: {0}")]
	Vetoed(String),
	#[error(transparent)]
	Store(#[from] StoreError),
}

/// Hook invoked by the state machine around every legal transition.
#[async_trait]
pub trait TransitionInterceptor: Send + Sync {
	/// Short name used in logs and errors.
	fn name(&self) -> &'static str;

	/// Runs before the state changes. An error aborts the transition.
	async fn pre_transition(&self, _context: &TransitionContext) -> Result<(), InterceptorError> {
		Ok(())
	}

	/// Runs after the state changed.
	async fn post_transition(&self, _context: &TransitionContext) {}
}

/// Logs every transition through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInterceptor;

#[async_trait]
impl TransitionInterceptor for LoggingInterceptor {
	fn name(&self) -> &'static str {
		"logging"
	}

	async fn pre_transition(&self, context: &TransitionContext) -> Result<(), InterceptorError> {
		tracing::debug!(
			order_id = %context.order_id,
			from = %context.from,
			to = %context.to,
			event = %context.event,
			"Transition requested"
		);
		Ok(())
	}

	async fn post_transition(&self, context: &TransitionContext) {
		tracing::info!(
			order_id = %context.order_id,
			from = %context.from,
			to = %context.to,
			event = %context.event,
			"State changed"
		);
	}
}

/// Publishes a [`LifecycleEvent::StateChanged`] for every committed transition.
#[derive(Debug, Clone)]
pub struct PublishingInterceptor {
	event_bus: EventBus,
}

impl PublishingInterceptor {
	pub fn new(event_bus: EventBus) -> Self {
		Self { event_bus }
	}
}

#[async_trait]
impl TransitionInterceptor for PublishingInterceptor {
	fn name(&self) -> &'static str {
		"publishing"
	}

	async fn post_transition(&self, context: &TransitionContext) {
		self.event_bus
			.publish(LifecycleEvent::StateChanged {
				order_id: context.order_id,
				from: context.from,
				to: context.to,
				event: context.event,
			})
			.ok();
	}
}
