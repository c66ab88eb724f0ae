//! Messages and per-request options shared by every layer.

use arcstr::ArcStr;
use bytes::Bytes;
use rumqttc::QoS;

/// Inbound or outbound MQTT application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
	/// Concrete topic, never contains wildcards
	pub topic: ArcStr,
	/// Raw payload bytes
	pub payload: Bytes,
	/// Delivery QoS
	pub qos: QoS,
	/// Broker-side retain flag
	pub retain: bool,
}

impl Message {
	/// Creates a non-retained QoS 0 message.
	pub fn new(topic: impl Into<ArcStr>, payload: impl Into<Bytes>) -> Self {
		Self {
			topic: topic.into(),
			payload: payload.into(),
			qos: QoS::AtMostOnce,
			retain: false,
		}
	}

	/// Sets the QoS level.
	pub fn with_qos(mut self, qos: QoS) -> Self {
		self.qos = qos;
		self
	}

	/// Sets the retain flag.
	pub fn with_retain(mut self, retain: bool) -> Self {
		self.retain = retain;
		self
	}
}

/// Options sent with a network-level subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
	/// Requested QoS
	pub qos: QoS,
}

impl Default for SubscribeOptions {
	fn default() -> Self {
		Self {
			qos: QoS::AtLeastOnce,
		}
	}
}

impl SubscribeOptions {
	/// Options with the given QoS.
	pub fn qos(qos: QoS) -> Self {
		Self { qos }
	}
}

/// Options for a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
	/// Delivery QoS
	pub qos: QoS,
	/// Ask the broker to retain the message
	pub retain: bool,
}

impl Default for PublishOptions {
	fn default() -> Self {
		Self {
			qos: QoS::AtMostOnce,
			retain: false,
		}
	}
}

impl PublishOptions {
	/// Sets Quality of Service level.
	pub fn with_qos(mut self, qos: QoS) -> Self {
		self.qos = qos;
		self
	}

	/// Sets retain flag.
	pub fn with_retain(mut self, retain: bool) -> Self {
		self.retain = retain;
		self
	}
}
