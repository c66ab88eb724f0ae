//! Boundary between the multiplexer and the protocol engine.
//!
//! The multiplexer only ever talks to a [`Transport`]: it issues requests
//! through the trait and learns about their outcome from the
//! [`TransportEvent`] stream that comes with every [`TransportHandle`].
//! Requests never block; acknowledgments always arrive as events.

use std::fmt;

use arcstr::ArcStr;
use bytes::Bytes;
use rumqttc::QoS;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

use super::error::TransportError;
use crate::client::config::{ClientSettings, ServiceConfig};
use crate::message::{Message, PublishOptions, SubscribeOptions};
use crate::routing::Generation;

/// Correlates a publish request with its completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublishToken(pub(crate) u64);

impl PublishToken {
	/// Creates a token from a raw value. Mostly useful for test transports.
	pub fn from_raw(raw: u64) -> Self {
		Self(raw)
	}

	/// Raw token value.
	pub fn as_u64(&self) -> u64 {
		self.0
	}
}

impl fmt::Display for PublishToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "PublishToken({})", self.0)
	}
}

/// Network-level subscribe request.
///
/// `generation` must be echoed back in the matching
/// [`TransportEvent::SubAck`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
	/// Subscription filter
	pub filter: ArcStr,
	/// Requested options
	pub options: SubscribeOptions,
	/// Registry entry cycle the request belongs to
	pub generation: Generation,
}

/// Network-level publish request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
	/// Destination topic
	pub topic: ArcStr,
	/// Payload bytes
	pub payload: Bytes,
	/// QoS and retain
	pub options: PublishOptions,
	/// Must be echoed back in the matching [`TransportEvent::PubAck`]
	pub token: PublishToken,
}

/// Broker verdict for one subscribed filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeGrant {
	/// Subscription accepted with the given maximum QoS
	Granted(QoS),
	/// Subscription refused
	Refused,
}

impl SubscribeGrant {
	/// SUBACK return code the broker uses to refuse a filter.
	pub const REFUSED_CODE: u8 = 0x80;

	/// Decodes a raw SUBACK return code.
	///
	/// Codes outside the MQTT 3.1.1 set are logged and treated as a refusal.
	pub fn from_code(code: u8) -> Self {
		match code {
			| 0 => SubscribeGrant::Granted(QoS::AtMostOnce),
			| 1 => SubscribeGrant::Granted(QoS::AtLeastOnce),
			| 2 => SubscribeGrant::Granted(QoS::ExactlyOnce),
			| Self::REFUSED_CODE => SubscribeGrant::Refused,
			| unexpected => {
				warn!(code = unexpected, "Unexpected SUBACK return code");
				SubscribeGrant::Refused
			}
		}
	}

	/// `true` unless the broker refused the filter.
	pub fn is_granted(&self) -> bool {
		matches!(self, SubscribeGrant::Granted(_))
	}
}

/// Everything a transport reports back to the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
	/// Connection (re)established and acknowledged by the broker
	Connect {
		/// Broker kept the previous session
		session_present: bool,
	},
	/// Connection closed
	Close,
	/// Transport or stream level error; does not change connection state
	Error(TransportError),
	/// Transport is attempting to re-establish the connection on its own
	Reconnect,
	/// Inbound application message
	Message(Message),
	/// Subscribe acknowledgment for one filter
	SubAck {
		/// Filter from the original request
		filter: ArcStr,
		/// Generation from the original request
		generation: Generation,
		/// Broker verdict
		grant: SubscribeGrant,
	},
	/// Unsubscribe acknowledgment
	UnsubAck {
		/// Filter from the original request
		filter: ArcStr,
	},
	/// Publish completion
	PubAck {
		/// Token from the original request
		token: PublishToken,
		/// Outcome reported by the transport
		result: Result<(), TransportError>,
	},
}

/// Request side of the protocol engine.
pub trait Transport: Send {
	/// Queues a subscribe. The verdict arrives as [`TransportEvent::SubAck`].
	fn subscribe(
		&mut self,
		request: SubscribeRequest,
	) -> Result<(), TransportError>;

	/// Queues an unsubscribe.
	fn unsubscribe(&mut self, filter: &ArcStr) -> Result<(), TransportError>;

	/// Queues a publish. Completion arrives as [`TransportEvent::PubAck`].
	fn publish(
		&mut self,
		request: PublishRequest,
	) -> Result<(), TransportError>;

	/// Ends the connection. `force` skips any graceful handshake.
	fn end(&mut self, force: bool);
}

/// A live transport together with its event stream.
pub struct TransportHandle {
	pub(crate) transport: Box<dyn Transport>,
	pub(crate) events: UnboundedReceiver<TransportEvent>,
}

impl TransportHandle {
	/// Pairs a transport with the receiver of the events it emits.
	pub fn new(
		transport: impl Transport + 'static,
		events: UnboundedReceiver<TransportEvent>,
	) -> Self {
		Self {
			transport: Box::new(transport),
			events,
		}
	}
}

impl fmt::Debug for TransportHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TransportHandle").finish_non_exhaustive()
	}
}

/// Opens transports for `connect()` calls that do not supply their own.
pub trait TransportConnector: Send + Sync {
	/// Opens a new transport towards `endpoint`.
	///
	/// Called from inside the multiplexer task; must not block.
	fn connect(
		&self,
		endpoint: &str,
		config: &ServiceConfig,
		settings: &ClientSettings,
	) -> Result<TransportHandle, TransportError>;
}
