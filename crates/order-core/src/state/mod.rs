//! State management for orders.
//!
//! This module provides the transition table, the per-order state machine and
//! the interceptor hooks that run around each transition.

pub mod interceptor;
pub mod machine;
pub mod table;

pub use interceptor::{
	InterceptorError, LoggingInterceptor, PublishingInterceptor, TransitionInterceptor,
};
pub use machine::{EventContext, OrderStateMachine, TransitionContext, TransitionError};
pub use table::{Transition, TransitionTable, TransitionTableBuilder, TransitionTableError};
