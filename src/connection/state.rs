//! Connection state machine.
//!
//! | event              | next state   | resubscribe |
//! |--------------------|--------------|-------------|
//! | `connect()`        | `Connecting` | no          |
//! | transport connect  | `Connected`  | yes         |
//! | transport reconnect| `Connecting` | yes         |
//! | transport close    | `Closed`     | no          |
//!
//! The current state is published on a `watch` channel, so every new
//! receiver sees it immediately and then each later transition.

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

/// Connection state of a multiplexer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
	/// No connection; initial and terminal state
	#[default]
	Closed,
	/// A connection attempt is in progress
	Connecting,
	/// Connected and acknowledged by the broker
	Connected,
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
	/// `connect()` was called
	ConnectRequested,
	/// Transport reported an established connection
	Connected,
	/// Transport reported the connection closed
	Closed,
	/// Transport started re-establishing the connection on its own
	Reconnecting,
}

/// Result of applying a [`LifecycleEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
	/// State before the event
	pub from: ConnectionState,
	/// State after the event
	pub to: ConnectionState,
	/// Every live subscription must be issued again
	pub resubscribe: bool,
}

/// Tracks [`ConnectionState`] and decides when to resubscribe.
///
/// [`apply`](Self::apply) only records the new state; observers see it once
/// [`broadcast`](Self::broadcast) is called, which lets the owner resubscribe
/// before announcing a fresh connection.
#[derive(Debug)]
pub struct ConnectionStateMachine {
	current: ConnectionState,
	state_tx: watch::Sender<ConnectionState>,
}

impl Default for ConnectionStateMachine {
	fn default() -> Self {
		Self::new()
	}
}

impl ConnectionStateMachine {
	/// Starts in [`ConnectionState::Closed`].
	pub fn new() -> Self {
		let (state_tx, _) = watch::channel(ConnectionState::Closed);
		Self {
			current: ConnectionState::Closed,
			state_tx,
		}
	}

	/// Current state, including transitions not broadcast yet.
	pub fn current(&self) -> ConnectionState {
		self.current
	}

	/// New receiver for the broadcast state.
	pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
		self.state_tx.subscribe()
	}

	/// Records the transition for `event`.
	pub fn apply(&mut self, event: LifecycleEvent) -> Transition {
		let from = self.current;
		let (to, resubscribe) = match event {
			| LifecycleEvent::ConnectRequested => {
				(ConnectionState::Connecting, false)
			}
			| LifecycleEvent::Connected => (ConnectionState::Connected, true),
			| LifecycleEvent::Closed => (ConnectionState::Closed, false),
			| LifecycleEvent::Reconnecting => {
				(ConnectionState::Connecting, true)
			}
		};
		self.current = to;
		if from != to {
			info!(from = ?from, to = ?to, event = ?event, "Connection state changed");
		}
		Transition {
			from,
			to,
			resubscribe,
		}
	}

	/// Publishes the current state to every receiver.
	pub fn broadcast(&self) {
		self.state_tx.send_replace(self.current);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_initial_state_is_closed() {
		let machine = ConnectionStateMachine::new();
		assert_eq!(machine.current(), ConnectionState::Closed);
		assert_eq!(*machine.subscribe().borrow(), ConnectionState::Closed);
	}

	#[test]
	fn test_transitions() {
		let mut machine = ConnectionStateMachine::new();

		let t = machine.apply(LifecycleEvent::ConnectRequested);
		assert_eq!(t.to, ConnectionState::Connecting);
		assert!(!t.resubscribe);

		let t = machine.apply(LifecycleEvent::Connected);
		assert_eq!(t.from, ConnectionState::Connecting);
		assert_eq!(t.to, ConnectionState::Connected);
		assert!(t.resubscribe);

		let t = machine.apply(LifecycleEvent::Reconnecting);
		assert_eq!(t.to, ConnectionState::Connecting);
		assert!(t.resubscribe);

		let t = machine.apply(LifecycleEvent::Closed);
		assert_eq!(t.to, ConnectionState::Closed);
		assert!(!t.resubscribe);
	}

	#[test]
	fn test_broadcast_is_deferred_until_requested() {
		let mut machine = ConnectionStateMachine::new();
		let rx = machine.subscribe();

		machine.apply(LifecycleEvent::ConnectRequested);
		assert_eq!(*rx.borrow(), ConnectionState::Closed);

		machine.broadcast();
		assert_eq!(*rx.borrow(), ConnectionState::Connecting);

		// late receivers start from the latest value
		let late = machine.subscribe();
		assert_eq!(*late.borrow(), ConnectionState::Connecting);
	}
}
