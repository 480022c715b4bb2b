//! Order lifecycle types.
//!
//! This module defines the persisted order record together with the closed
//! sets of lifecycle states and events that drive transitions between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when parsing a state, event or identifier from text fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
	#[error("Invalid order state: {0}")]
	State(String),
	#[error("Invalid order event: {0}")]
	Event(String),
	#[error("Invalid order id: {0}")]
	Id(String),
}

/// Unique identifier of an order, assigned by the store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl OrderId {
	/// Returns the raw numeric value.
	pub fn value(&self) -> u64 {
		self.0
	}
}

impl fmt::Display for OrderId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for OrderId {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		s.trim()
			.parse::<u64>()
			.map(OrderId)
			.map_err(|_| ParseError::Id(s.to_string()))
	}
}

impl From<u64> for OrderId {
	fn from(value: u64) -> Self {
		Self(value)
	}
}

/// Lifecycle state of an order.
///
/// `Fulfilled` and `Cancelled` are terminal: no event leads out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
	/// Order has been placed and awaits payment.
	Submitted,
	/// Payment has been confirmed.
	Paid,
	/// Order has been delivered.
	Fulfilled,
	/// Order was cancelled before fulfillment.
	Cancelled,
}

impl OrderState {
	/// Returns every declared state.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Submitted, Self::Paid, Self::Fulfilled, Self::Cancelled].into_iter()
	}

	/// Returns the persisted representation of the state.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Submitted => "SUBMITTED",
			Self::Paid => "PAID",
			Self::Fulfilled => "FULFILLED",
			Self::Cancelled => "CANCELLED",
		}
	}

	/// Check if this is a terminal state.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Fulfilled | Self::Cancelled)
	}
}

impl fmt::Display for OrderState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderState {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"SUBMITTED" => Ok(Self::Submitted),
			"PAID" => Ok(Self::Paid),
			"FULFILLED" => Ok(Self::Fulfilled),
			"CANCELLED" => Ok(Self::Cancelled),
			_ => Err(ParseError::State(s.to_string())),
		}
	}
}

/// External stimulus that may move an order to another state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEvent {
	Pay,
	Fulfill,
	Cancel,
}

impl OrderEvent {
	/// Returns every declared event.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Pay, Self::Fulfill, Self::Cancel].into_iter()
	}

	/// Get a string representation of the event for logging.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Pay => "PAY",
			Self::Fulfill => "FULFILL",
			Self::Cancel => "CANCEL",
		}
	}
}

impl fmt::Display for OrderEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderEvent {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"PAY" => Ok(Self::Pay),
			"FULFILL" => Ok(Self::Fulfill),
			"CANCEL" => Ok(Self::Cancel),
			_ => Err(ParseError::Event(s.to_string())),
		}
	}
}

/// Persisted order record.
///
/// The `state` field is the single source of truth for where the order is in
/// its lifecycle. It changes only through a validated transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
	/// Unique identifier for this order.
	pub id: OrderId,
	/// Timestamp when this order was created.
	pub created_at: DateTime<Utc>,
	/// Timestamp of the last committed transition.
	pub updated_at: DateTime<Utc>,
	/// Current lifecycle state.
	pub state: OrderState,
}

impl Order {
	/// Returns a copy of this order moved to `state`, stamped at `at`.
	pub fn with_state(&self, state: OrderState, at: DateTime<Utc>) -> Self {
		Self {
			id: self.id,
			created_at: self.created_at,
			updated_at: at,
			state,
		}
	}
}

/// Insert payload for an order that has no identifier yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
	pub created_at: DateTime<Utc>,
	pub state: OrderState,
}

impl NewOrder {
	/// Creates a payload for a freshly submitted order.
	pub fn submitted(created_at: DateTime<Utc>) -> Self {
		Self {
			created_at,
			state: OrderState::Submitted,
		}
	}

	/// Attaches the store-assigned identifier.
	pub fn into_order(self, id: OrderId) -> Order {
		Order {
			id,
			created_at: self.created_at,
			updated_at: self.created_at,
			state: self.state,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn test_terminal_states() {
		assert!(OrderState::Fulfilled.is_terminal());
		assert!(OrderState::Cancelled.is_terminal());
		assert!(!OrderState::Submitted.is_terminal());
		assert!(!OrderState::Paid.is_terminal());
	}

	#[test]
	fn test_state_string_conversion() {
		assert_eq!(OrderState::Paid.to_string(), "PAID");
		assert_eq!("fulfilled".parse::<OrderState>().unwrap(), OrderState::Fulfilled);
		assert!(matches!(
			"shipped".parse::<OrderState>(),
			Err(ParseError::State(s)) if s == "shipped"
		));
	}

	#[test]
	fn test_event_string_conversion() {
		assert_eq!(OrderEvent::Cancel.to_string(), "CANCEL");
		assert_eq!("pay".parse::<OrderEvent>().unwrap(), OrderEvent::Pay);
		assert!("refund".parse::<OrderEvent>().is_err());
	}

	#[test]
	fn test_order_serde_shape() {
		let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
		let order = NewOrder::submitted(created).into_order(OrderId(7));

		let json = serde_json::to_value(&order).unwrap();
		assert_eq!(json["id"], 7);
		assert_eq!(json["state"], "SUBMITTED");

		let parsed: Order = serde_json::from_value(json).unwrap();
		assert_eq!(parsed, order);
	}

	#[test]
	fn test_with_state_keeps_identity() {
		let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
		let later = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
		let order = NewOrder::submitted(created).into_order(OrderId(1));

		let paid = order.with_state(OrderState::Paid, later);
		assert_eq!(paid.id, order.id);
		assert_eq!(paid.created_at, created);
		assert_eq!(paid.updated_at, later);
		assert_eq!(paid.state, OrderState::Paid);
	}

	#[test]
	fn test_order_id_parse() {
		assert_eq!(" 42 ".parse::<OrderId>().unwrap(), OrderId(42));
		assert!("abc".parse::<OrderId>().is_err());
	}
}
