//! Errors returned by the service facade.

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

use crate::connection::TransportError;
use crate::routing::{ObserverHandle, SubscriptionError};
use crate::topic::TopicError;

/// Failure of a single awaited publish.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
	/// No transport exists
	#[error("MQTT client not connected")]
	NotConnected,

	/// Topic failed validation
	#[error("Invalid topic: {0}")]
	InvalidTopic(#[from] TopicError),

	/// Transport rejected or failed the publish
	#[error("Publish failed: {0}")]
	Transport(#[from] TransportError),

	/// The transport was replaced or ended before completing the publish
	#[error("Connection replaced before publish completed")]
	ConnectionReplaced,

	/// Communication channel closed
	#[error("Communication channel closed")]
	ChannelClosed,

	/// Response from the multiplexer was lost
	#[error("Publish response was lost")]
	ResponseLost,
}

/// Errors returned by [`MqttService`](crate::MqttService) operations
#[derive(Debug, Error)]
pub enum MqttServiceError {
	/// A protocol operation was attempted while no transport exists
	#[error("MQTT client not connected")]
	NotConnected,

	/// Topic or filter failed validation
	#[error("Topic error: {0}")]
	Topic(#[from] TopicError),

	/// Subscription management errors
	#[error("Subscription error: {0}")]
	Subscription(#[from] SubscriptionError),

	/// Publish errors
	#[error("Publish error: {0}")]
	Publish(#[from] PublishError),

	/// Transport could not be opened
	#[error("Transport error: {0}")]
	Transport(#[from] TransportError),

	/// The multiplexer task is gone
	#[error("Multiplexer task is not running")]
	ChannelClosed,

	/// The multiplexer dropped the reply
	#[error("Response from multiplexer was lost")]
	ResponseLost,

	/// Service was created outside a Tokio runtime
	#[error("No Tokio runtime available: {0}")]
	NoRuntime(String),

	/// Release command could not be delivered
	#[error("Failed to release observer {0}: multiplexer channel closed")]
	ReleaseFailed(ObserverHandle),
}

impl From<SendError<ObserverHandle>> for MqttServiceError {
	fn from(SendError(handle): SendError<ObserverHandle>) -> Self {
		MqttServiceError::ReleaseFailed(handle)
	}
}
