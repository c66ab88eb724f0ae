//! Errors delivered to observers.

use arcstr::ArcStr;
use thiserror::Error;

use crate::connection::TransportError;

/// Errors during subscription operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
	/// Broker refused the filter; the observer stream ends after this
	#[error("Subscription for '{filter}' rejected")]
	Rejected {
		/// Refused filter
		filter: ArcStr,
	},
	/// Transport refused to queue the subscribe request
	#[error("Failed to subscribe to '{filter}': {source}")]
	SubscribeFailed {
		/// Filter of the failed request
		filter: ArcStr,
		/// Transport failure
		source: TransportError,
	},
	/// Communication channel closed
	#[error("Communication channel closed")]
	ChannelClosed,
	/// Response from the multiplexer was lost
	#[error("Response from subscription manager was lost")]
	ResponseLost,
}
