//! Lifecycle event types for in-process observers.
//!
//! Events are published after a change has been committed to the store, so a
//! subscriber never sees a transition that was later rolled back.

use crate::{OrderEvent, OrderId, OrderState};
use serde::{Deserialize, Serialize};

/// Events describing committed changes to orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
	/// A new order has been persisted.
	OrderCreated { order_id: OrderId, state: OrderState },
	/// An order moved from one state to another.
	StateChanged {
		order_id: OrderId,
		from: OrderState,
		to: OrderState,
		event: OrderEvent,
	},
}

impl LifecycleEvent {
	/// Returns the order the event refers to.
	pub fn order_id(&self) -> OrderId {
		match self {
			Self::OrderCreated { order_id, .. } | Self::StateChanged { order_id, .. } => *order_id,
		}
	}
}
