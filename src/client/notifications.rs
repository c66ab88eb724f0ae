//! Broadcast notification streams
//!
//! One producer (the multiplexer task), any number of independent
//! consumers. Unlike the connection state, nothing here is replayed: a
//! receiver only sees what is sent after it subscribed.

use std::sync::Arc;

use arcstr::ArcStr;
use tokio::sync::broadcast;

use crate::connection::TransportError;
use crate::message::Message;

/// Sent on every established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectNotification {
	/// Broker kept the previous session
	pub session_present: bool,
}

/// Sent for every SUBACK, granted or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubackNotification {
	/// Acknowledged filter
	pub filter: ArcStr,
	/// `false` if the broker refused it
	pub granted: bool,
}

/// Unrecoverable failures nobody is awaiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
	/// A fire-and-forget publish failed
	PublishFailed {
		/// Destination topic
		topic: ArcStr,
		/// Failure reported by the transport
		error: TransportError,
	},
}

impl std::fmt::Display for Fault {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			| Fault::PublishFailed { topic, error } => {
				write!(f, "unsafe publish to '{topic}' failed: {error}")
			}
		}
	}
}

/// Sending halves of every notification stream.
#[derive(Debug, Clone)]
pub(crate) struct Notifications {
	pub connect: broadcast::Sender<ConnectNotification>,
	pub close: broadcast::Sender<()>,
	pub error: broadcast::Sender<TransportError>,
	pub reconnect: broadcast::Sender<()>,
	pub message: broadcast::Sender<Arc<Message>>,
	pub suback: broadcast::Sender<SubackNotification>,
	pub fault: broadcast::Sender<Fault>,
}

impl Notifications {
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			connect: broadcast::channel(capacity).0,
			close: broadcast::channel(capacity).0,
			error: broadcast::channel(capacity).0,
			reconnect: broadcast::channel(capacity).0,
			message: broadcast::channel(capacity).0,
			suback: broadcast::channel(capacity).0,
			fault: broadcast::channel(capacity).0,
		}
	}
}

/// Sends on a broadcast channel that may have no receivers.
pub(crate) fn notify<T>(sender: &broadcast::Sender<T>, value: T) {
	// no receivers is not an error for a notification stream
	let _ = sender.send(value);
}
