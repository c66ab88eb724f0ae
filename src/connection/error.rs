//! Transport failures.

use thiserror::Error;

/// Failures reported by a transport.
///
/// Carries rendered messages rather than the underlying error values so it
/// can be cloned onto broadcast streams and into every affected observer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
	/// The transport refused to queue a request
	#[error("Transport rejected request: {0}")]
	Request(String),

	/// The network connection failed or was lost
	#[error("Connection error: {0}")]
	Connection(String),

	/// The underlying byte stream reported an error
	#[error("Stream error: {0}")]
	Stream(String),

	/// Broker refused the connection
	#[error("Broker refused connection: {0}")]
	Refused(String),

	/// The endpoint scheme is not supported by this transport
	#[error("Unsupported protocol '{0}'")]
	UnsupportedProtocol(String),

	/// The transport ended before the request completed
	#[error("Transport closed")]
	Closed,
}

impl From<rumqttc::ClientError> for TransportError {
	fn from(err: rumqttc::ClientError) -> Self {
		TransportError::Request(err.to_string())
	}
}

impl From<rumqttc::ConnectionError> for TransportError {
	fn from(err: rumqttc::ConnectionError) -> Self {
		match err {
			| rumqttc::ConnectionError::Io(io) => {
				TransportError::Stream(io.to_string())
			}
			| rumqttc::ConnectionError::ConnectionRefused(code) => {
				TransportError::Refused(format!("{code:?}"))
			}
			| other => TransportError::Connection(other.to_string()),
		}
	}
}
