//! Order service that drives orders through their lifecycle.
//!
//! Every operation is request-scoped: the order is read from the store, a
//! transient state machine evaluates the event and the result is written
//! back with a conditional update. The store is the only durable state.

pub mod event_bus;
pub mod rehydrator;

use crate::error::OperationError;
use crate::state::{
	EventContext, LoggingInterceptor, PublishingInterceptor, TransitionInterceptor,
	TransitionTable,
};
use crate::store::OrderStore;
use chrono::{DateTime, Utc};
use event_bus::EventBus;
use order_types::{LifecycleEvent, NewOrder, Order, OrderEvent, OrderId, OrderState};
use rehydrator::Rehydrator;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::instrument;

/// Context key carrying the payment confirmation number of a PAY event.
pub const PAYMENT_NUMBER: &str = "paymentNumber";

/// Public API for creating orders and moving them through their lifecycle.
///
/// Cheap to clone; clones share the store, table and event bus.
#[derive(Clone)]
pub struct OrderService {
	store: Arc<dyn OrderStore>,
	table: Arc<TransitionTable>,
	rehydrator: Arc<Rehydrator>,
	event_bus: EventBus,
}

impl OrderService {
	/// Creates a service with the default logging and publishing interceptors.
	pub fn new(
		store: Arc<dyn OrderStore>,
		table: Arc<TransitionTable>,
		event_bus: EventBus,
		max_transition_retries: u32,
	) -> Self {
		Self::with_interceptors(store, table, event_bus, max_transition_retries, Vec::new())
	}

	/// Creates a service whose machines additionally run `interceptors`.
	///
	/// Extra interceptors run after the logging and publishing ones and
	/// before the persistence write, so a veto never reaches the store.
	pub fn with_interceptors(
		store: Arc<dyn OrderStore>,
		table: Arc<TransitionTable>,
		event_bus: EventBus,
		max_transition_retries: u32,
		interceptors: Vec<Arc<dyn TransitionInterceptor>>,
	) -> Self {
		let mut rehydrator = Rehydrator::new(table.clone(), store.clone(), max_transition_retries)
			.with_interceptor(Arc::new(LoggingInterceptor))
			.with_interceptor(Arc::new(PublishingInterceptor::new(event_bus.clone())));
		for interceptor in interceptors {
			rehydrator = rehydrator.with_interceptor(interceptor);
		}

		Self {
			store,
			table,
			rehydrator: Arc::new(rehydrator),
			event_bus,
		}
	}

	/// Persists a new order in the initial state.
	#[instrument(skip_all)]
	pub async fn create(&self, created_at: DateTime<Utc>) -> Result<Order, OperationError> {
		let order = self.store.insert(NewOrder::submitted(created_at)).await?;
		tracing::info!(order_id = %order.id, state = %order.state, "Order created");

		self.event_bus
			.publish(LifecycleEvent::OrderCreated {
				order_id: order.id,
				state: order.state,
			})
			.ok();
		Ok(order)
	}

	/// Records a payment for the order.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn pay(
		&self,
		order_id: OrderId,
		confirmation_number: &str,
	) -> Result<Order, OperationError> {
		tracing::debug!(payment_number = %confirmation_number, "Paying order");
		let context = EventContext::new().with(PAYMENT_NUMBER, confirmation_number);
		self.submit(order_id, OrderEvent::Pay, context).await
	}

	/// Marks a paid order as fulfilled.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn fulfill(&self, order_id: OrderId) -> Result<Order, OperationError> {
		self.submit(order_id, OrderEvent::Fulfill, EventContext::new())
			.await
	}

	/// Cancels an order that has not been fulfilled.
	#[instrument(skip_all, fields(order_id = %order_id))]
	pub async fn cancel(&self, order_id: OrderId) -> Result<Order, OperationError> {
		self.submit(order_id, OrderEvent::Cancel, EventContext::new())
			.await
	}

	/// Applies an arbitrary event to the order.
	pub async fn submit(
		&self,
		order_id: OrderId,
		event: OrderEvent,
		context: EventContext,
	) -> Result<Order, OperationError> {
		self.rehydrator.for_order(order_id, event, context).await
	}

	/// Looks up an order without evaluating anything.
	pub async fn by_id(&self, order_id: OrderId) -> Result<Order, OperationError> {
		Ok(self.store.get(order_id).await?)
	}

	/// Events accepted in `state`.
	pub fn legal_events(&self, state: OrderState) -> Vec<OrderEvent> {
		self.table.events_from(state)
	}

	/// Subscribes to lifecycle events committed from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
		self.event_bus.subscribe()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state::{InterceptorError, TransitionContext};
	use crate::store::StorageOrderStore;
	use async_trait::async_trait;
	use chrono::TimeZone;
	use order_storage::{implementations::memory::MemoryStorage, StorageService};

	fn t0() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
	}

	fn store() -> Arc<dyn OrderStore> {
		Arc::new(StorageOrderStore::new(Arc::new(StorageService::new(
			Box::new(MemoryStorage::new()),
		))))
	}

	fn service() -> OrderService {
		OrderService::new(
			store(),
			TransitionTable::order_lifecycle().unwrap(),
			EventBus::new(64),
			3,
		)
	}

	async fn order_in(service: &OrderService, state: OrderState) -> Order {
		let order = service.create(t0()).await.unwrap();
		match state {
			OrderState::Submitted => order,
			OrderState::Paid => service.pay(order.id, "conf").await.unwrap(),
			OrderState::Fulfilled => {
				service.pay(order.id, "conf").await.unwrap();
				service.fulfill(order.id).await.unwrap()
			},
			OrderState::Cancelled => service.cancel(order.id).await.unwrap(),
		}
	}

	#[tokio::test]
	async fn test_create_starts_submitted() {
		let service = service();
		let order = service.create(t0()).await.unwrap();

		assert_eq!(order.id, OrderId(1));
		assert_eq!(order.state, OrderState::Submitted);
		assert_eq!(order.created_at, t0());
		assert_eq!(service.by_id(order.id).await.unwrap(), order);
	}

	#[tokio::test]
	async fn test_pay_is_seen_by_fresh_rehydration() {
		let service = service();
		let order = service.create(t0()).await.unwrap();

		let paid = service.pay(order.id, "conf-123").await.unwrap();
		assert_eq!(paid.state, OrderState::Paid);
		assert_eq!(service.by_id(order.id).await.unwrap().state, OrderState::Paid);

		let fulfilled = service.fulfill(order.id).await.unwrap();
		assert_eq!(fulfilled.state, OrderState::Fulfilled);
	}

	#[tokio::test]
	async fn test_cancel_from_submitted_and_paid() {
		let service = service();

		let submitted = order_in(&service, OrderState::Submitted).await;
		assert_eq!(
			service.cancel(submitted.id).await.unwrap().state,
			OrderState::Cancelled
		);

		let paid = order_in(&service, OrderState::Paid).await;
		assert_eq!(
			service.cancel(paid.id).await.unwrap().state,
			OrderState::Cancelled
		);
	}

	#[tokio::test]
	async fn test_illegal_pairs_leave_store_unchanged() {
		let service = service();
		let table = TransitionTable::order_lifecycle().unwrap();

		for state in OrderState::all() {
			for event in OrderEvent::all() {
				if table.lookup(state, event).is_some() {
					continue;
				}
				let order = order_in(&service, state).await;
				let result = service.submit(order.id, event, EventContext::new()).await;

				assert_eq!(
					result.unwrap_err(),
					OperationError::IllegalTransition { from: state, event }
				);
				assert_eq!(service.by_id(order.id).await.unwrap(), order);
			}
		}
	}

	#[tokio::test]
	async fn test_repeated_illegal_event_is_idempotent() {
		let service = service();
		let order = order_in(&service, OrderState::Cancelled).await;

		let first = service.cancel(order.id).await.unwrap_err();
		let second = service.cancel(order.id).await.unwrap_err();

		assert_eq!(first, second);
		assert_eq!(service.by_id(order.id).await.unwrap(), order);
	}

	#[tokio::test]
	async fn test_unknown_order() {
		let service = service();
		let expected = OperationError::OrderNotFound {
			order_id: OrderId(99),
		};

		assert_eq!(service.by_id(OrderId(99)).await.unwrap_err(), expected);
		assert_eq!(service.pay(OrderId(99), "conf").await.unwrap_err(), expected);
		assert_eq!(service.fulfill(OrderId(99)).await.unwrap_err(), expected);
		assert_eq!(service.cancel(OrderId(99)).await.unwrap_err(), expected);
	}

	#[tokio::test]
	async fn test_lifecycle_events_published() {
		let service = service();
		let mut events = service.subscribe();

		let order = service.create(t0()).await.unwrap();
		service.pay(order.id, "conf").await.unwrap();
		let _ = service.fulfill(order.id).await;
		let _ = service.cancel(order.id).await;

		assert_eq!(
			events.recv().await.unwrap(),
			LifecycleEvent::OrderCreated {
				order_id: order.id,
				state: OrderState::Submitted,
			}
		);
		assert_eq!(
			events.recv().await.unwrap(),
			LifecycleEvent::StateChanged {
				order_id: order.id,
				from: OrderState::Submitted,
				to: OrderState::Paid,
				event: OrderEvent::Pay,
			}
		);
		assert_eq!(
			events.recv().await.unwrap(),
			LifecycleEvent::StateChanged {
				order_id: order.id,
				from: OrderState::Paid,
				to: OrderState::Fulfilled,
				event: OrderEvent::Fulfill,
			}
		);
		// The rejected cancel is never published.
		assert!(events.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_payment_number_reaches_interceptors() {
		struct RequirePayment;

		#[async_trait]
		impl TransitionInterceptor for RequirePayment {
			fn name(&self) -> &'static str {
				"require-payment"
			}

			async fn pre_transition(
				&self,
				context: &TransitionContext,
			) -> Result<(), InterceptorError> {
				match (context.event, context.context.get(PAYMENT_NUMBER)) {
					(OrderEvent::Pay, Some(number)) if !number.is_empty() => Ok(()),
					(OrderEvent::Pay, _) => Err(InterceptorError::Vetoed(
						"missing payment number".into(),
					)),
					_ => Ok(()),
				}
			}
		}

		let service = OrderService::with_interceptors(
			store(),
			TransitionTable::order_lifecycle().unwrap(),
			EventBus::new(8),
			3,
			vec![Arc::new(RequirePayment)],
		);
		let order = service.create(t0()).await.unwrap();

		let vetoed = service.pay(order.id, "").await.unwrap_err();
		assert!(matches!(vetoed, OperationError::Interceptor(_)));
		assert_eq!(
			service.by_id(order.id).await.unwrap().state,
			OrderState::Submitted
		);

		let paid = service.pay(order.id, "conf-9").await.unwrap();
		assert_eq!(paid.state, OrderState::Paid);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn test_concurrent_pay_has_single_winner() {
		for _ in 0..20 {
			let service = service();
			let order_id = service.create(t0()).await.unwrap().id;

			let first = tokio::spawn({
				let service = service.clone();
				async move { service.pay(order_id, "conf-a").await }
			});
			let second = tokio::spawn({
				let service = service.clone();
				async move { service.pay(order_id, "conf-b").await }
			});
			let results = [first.await.unwrap(), second.await.unwrap()];

			let successes = results.iter().filter(|r| r.is_ok()).count();
			assert_eq!(successes, 1);
			for result in &results {
				if let Err(err) = result {
					assert!(
						matches!(
							err,
							OperationError::IllegalTransition {
								from: OrderState::Paid,
								event: OrderEvent::Pay,
							} | OperationError::ConcurrentModification { .. }
						),
						"unexpected error: {err}"
					);
				}
			}
			assert_eq!(service.by_id(order_id).await.unwrap().state, OrderState::Paid);
		}
	}

	#[test]
	fn test_legal_events() {
		let service = service();
		assert_eq!(
			service.legal_events(OrderState::Submitted),
			vec![OrderEvent::Pay, OrderEvent::Cancel]
		);
		assert!(service.legal_events(OrderState::Fulfilled).is_empty());
	}
}
