//! Core order lifecycle engine.
//!
//! Orders move through SUBMITTED -> PAID -> FULFILLED, or to CANCELLED before
//! fulfilment. Each operation rehydrates a short-lived state machine from the
//! persisted order, evaluates the event against a static transition table and
//! commits the new state with a conditional write. Rejected events never touch
//! the store.

pub mod builder;
pub mod engine;
pub mod error;
pub mod state;
pub mod store;

pub use builder::{BuilderError, OrderServiceBuilder};
pub use engine::{event_bus::EventBus, rehydrator::Rehydrator, OrderService, PAYMENT_NUMBER};
pub use error::OperationError;
pub use state::{
	EventContext, InterceptorError, LoggingInterceptor, OrderStateMachine, PublishingInterceptor,
	TransitionContext, TransitionError, TransitionInterceptor, TransitionTable,
	TransitionTableError,
};
pub use store::{OrderStore, StorageOrderStore, StoreError};
