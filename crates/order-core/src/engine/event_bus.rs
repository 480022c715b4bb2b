//! Event bus for broadcasting order lifecycle events.
//!
//! Observers subscribe to a broadcast channel and receive every
//! [`LifecycleEvent`] published after the subscription was taken. Publishing
//! never blocks; events are dropped when nobody is listening.

use order_types::LifecycleEvent;
use tokio::sync::broadcast;

/// Default channel capacity used by the service builder.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Broadcast-based event bus, cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
	sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
	/// Creates a new bus buffering up to `capacity` events per slow receiver.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self { sender }
	}

	/// Subscribes to all events published from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event to all current subscribers.
	///
	/// Returns the number of receivers the event was delivered to.
	pub fn publish(
		&self,
		event: LifecycleEvent,
	) -> Result<usize, broadcast::error::SendError<LifecycleEvent>> {
		self.sender.send(event)
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(DEFAULT_EVENT_CAPACITY)
	}
}
