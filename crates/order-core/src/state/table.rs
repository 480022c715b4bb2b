//! Declarative transition table for the order lifecycle.
//!
//! The table is a static graph of `(source state, event) -> target state`
//! entries. It is validated once on construction and shared read-only by
//! every state machine afterwards.

use once_cell::sync::Lazy;
use order_types::{OrderEvent, OrderState};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building a transition table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionTableError {
	#[error("Duplicate transition for {event} from {source_state}")]
	DuplicateTransition {
		source_state: OrderState,
		event: OrderEvent,
	},
	#[error("State {0} is not reachable from the initial state")]
	UnreachableState(OrderState),
	#[error("Terminal state {state} declares an outgoing transition on {event}")]
	TerminalHasOutgoing { state: OrderState, event: OrderEvent },
}

/// A single declared transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transition {
	pub source: OrderState,
	pub event: OrderEvent,
	pub target: OrderState,
}

/// Validated, immutable transition graph.
#[derive(Debug, Clone)]
pub struct TransitionTable {
	initial: OrderState,
	terminal: HashSet<OrderState>,
	entries: HashMap<(OrderState, OrderEvent), OrderState>,
}

/// The order lifecycle, built on first use.
static ORDER_LIFECYCLE: Lazy<Result<Arc<TransitionTable>, TransitionTableError>> =
	Lazy::new(|| {
		TransitionTable::builder(OrderState::Submitted)
			.terminal(OrderState::Fulfilled)
			.terminal(OrderState::Cancelled)
			.transition(OrderState::Submitted, OrderEvent::Pay, OrderState::Paid)
			.transition(OrderState::Paid, OrderEvent::Fulfill, OrderState::Fulfilled)
			.transition(OrderState::Submitted, OrderEvent::Cancel, OrderState::Cancelled)
			.transition(OrderState::Paid, OrderEvent::Cancel, OrderState::Cancelled)
			.build()
			.map(Arc::new)
	});

impl TransitionTable {
	/// Starts a table rooted at `initial`.
	pub fn builder(initial: OrderState) -> TransitionTableBuilder {
		TransitionTableBuilder {
			initial,
			terminal: Vec::new(),
			transitions: Vec::new(),
		}
	}

	/// Returns the shared order lifecycle table.
	///
	/// SUBMITTED -PAY-> PAID -FULFILL-> FULFILLED, with CANCEL allowed from
	/// SUBMITTED and PAID.
	pub fn order_lifecycle() -> Result<Arc<TransitionTable>, TransitionTableError> {
		(*ORDER_LIFECYCLE).clone()
	}

	/// Returns the target of `event` in `source`, if declared.
	pub fn lookup(&self, source: OrderState, event: OrderEvent) -> Option<OrderState> {
		self.entries.get(&(source, event)).copied()
	}

	/// Returns the state new orders start in.
	pub fn initial(&self) -> OrderState {
		self.initial
	}

	/// Returns true when the state was declared terminal.
	pub fn is_terminal(&self, state: OrderState) -> bool {
		self.terminal.contains(&state)
	}

	/// Returns the events accepted in `state`, in declaration order of
	/// [`OrderEvent::all`].
	pub fn events_from(&self, state: OrderState) -> Vec<OrderEvent> {
		OrderEvent::all()
			.filter(|event| self.entries.contains_key(&(state, *event)))
			.collect()
	}

	/// Returns every declared transition.
	pub fn transitions(&self) -> impl Iterator<Item = Transition> + '_ {
		self.entries.iter().map(|(&(source, event), &target)| Transition {
			source,
			event,
			target,
		})
	}
}

/// Collects declarations and validates them in [`TransitionTableBuilder::build`].
#[derive(Debug, Clone)]
pub struct TransitionTableBuilder {
	initial: OrderState,
	terminal: Vec<OrderState>,
	transitions: Vec<Transition>,
}

impl TransitionTableBuilder {
	/// Declares a terminal state.
	pub fn terminal(mut self, state: OrderState) -> Self {
		self.terminal.push(state);
		self
	}

	/// Declares a transition.
	pub fn transition(mut self, source: OrderState, event: OrderEvent, target: OrderState) -> Self {
		self.transitions.push(Transition {
			source,
			event,
			target,
		});
		self
	}

	/// Validates the declarations and produces the table.
	pub fn build(self) -> Result<TransitionTable, TransitionTableError> {
		let terminal: HashSet<OrderState> = self.terminal.into_iter().collect();
		let mut entries = HashMap::with_capacity(self.transitions.len());

		for transition in &self.transitions {
			if terminal.contains(&transition.source) {
				return Err(TransitionTableError::TerminalHasOutgoing {
					state: transition.source,
					event: transition.event,
				});
			}
			if entries
				.insert((transition.source, transition.event), transition.target)
				.is_some()
			{
				return Err(TransitionTableError::DuplicateTransition {
					source_state: transition.source,
					event: transition.event,
				});
			}
		}

		let mut reached = HashSet::from([self.initial]);
		let mut queue = VecDeque::from([self.initial]);
		while let Some(state) = queue.pop_front() {
			for (&(source, _), &target) in &entries {
				if source == state && reached.insert(target) {
					queue.push_back(target);
				}
			}
		}
		if let Some(unreached) = OrderState::all().find(|state| !reached.contains(state)) {
			return Err(TransitionTableError::UnreachableState(unreached));
		}

		Ok(TransitionTable {
			initial: self.initial,
			terminal,
			entries,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn lifecycle() -> Arc<TransitionTable> {
		TransitionTable::order_lifecycle().unwrap()
	}

	#[test]
	fn test_declared_transitions() {
		let table = lifecycle();
		assert_eq!(
			table.lookup(OrderState::Submitted, OrderEvent::Pay),
			Some(OrderState::Paid)
		);
		assert_eq!(
			table.lookup(OrderState::Paid, OrderEvent::Fulfill),
			Some(OrderState::Fulfilled)
		);
		assert_eq!(
			table.lookup(OrderState::Submitted, OrderEvent::Cancel),
			Some(OrderState::Cancelled)
		);
		assert_eq!(
			table.lookup(OrderState::Paid, OrderEvent::Cancel),
			Some(OrderState::Cancelled)
		);
		assert_eq!(table.transitions().count(), 4);
		assert_eq!(table.initial(), OrderState::Submitted);
	}

	#[test]
	fn test_new_orders_start_in_initial_state() {
		let created_at = chrono::Utc::now();
		let order = order_types::NewOrder::submitted(created_at);
		assert_eq!(order.state, lifecycle().initial());
	}

	#[test]
	fn test_undeclared_pairs_are_absent() {
		let table = lifecycle();
		let undeclared = [
			(OrderState::Submitted, OrderEvent::Fulfill),
			(OrderState::Paid, OrderEvent::Pay),
			(OrderState::Fulfilled, OrderEvent::Pay),
			(OrderState::Fulfilled, OrderEvent::Fulfill),
			(OrderState::Fulfilled, OrderEvent::Cancel),
			(OrderState::Cancelled, OrderEvent::Pay),
			(OrderState::Cancelled, OrderEvent::Fulfill),
			(OrderState::Cancelled, OrderEvent::Cancel),
		];
		for (state, event) in undeclared {
			assert_eq!(table.lookup(state, event), None, "{state} x {event}");
		}
	}

	#[test]
	fn test_terminal_states_have_no_events() {
		let table = lifecycle();
		for state in OrderState::all() {
			assert_eq!(table.is_terminal(state), state.is_terminal());
			assert_eq!(table.events_from(state).is_empty(), state.is_terminal());
		}
		assert_eq!(
			table.events_from(OrderState::Submitted),
			vec![OrderEvent::Pay, OrderEvent::Cancel]
		);
		assert_eq!(
			table.events_from(OrderState::Paid),
			vec![OrderEvent::Fulfill, OrderEvent::Cancel]
		);
	}

	#[test]
	fn test_duplicate_transition_rejected() {
		let result = TransitionTable::builder(OrderState::Submitted)
			.transition(OrderState::Submitted, OrderEvent::Pay, OrderState::Paid)
			.transition(OrderState::Submitted, OrderEvent::Pay, OrderState::Cancelled)
			.build();
		assert_eq!(
			result.unwrap_err(),
			TransitionTableError::DuplicateTransition {
				source_state: OrderState::Submitted,
				event: OrderEvent::Pay,
			}
		);
	}

	#[test]
	fn test_unreachable_state_rejected() {
		let result = TransitionTable::builder(OrderState::Submitted)
			.terminal(OrderState::Fulfilled)
			.transition(OrderState::Submitted, OrderEvent::Pay, OrderState::Paid)
			.transition(OrderState::Paid, OrderEvent::Fulfill, OrderState::Fulfilled)
			.build();
		assert_eq!(
			result.unwrap_err(),
			TransitionTableError::UnreachableState(OrderState::Cancelled)
		);
	}

	#[test]
	fn test_terminal_with_outgoing_rejected() {
		let result = TransitionTable::builder(OrderState::Submitted)
			.terminal(OrderState::Cancelled)
			.transition(OrderState::Submitted, OrderEvent::Cancel, OrderState::Cancelled)
			.transition(OrderState::Cancelled, OrderEvent::Pay, OrderState::Paid)
			.build();
		assert!(matches!(
			result,
			Err(TransitionTableError::TerminalHasOutgoing {
				state: OrderState::Cancelled,
				..
			})
		));
	}
}
