//! # MQTT Multiplexer
//!
//! Shares one MQTT connection between many independent observers.
//!
//! Any number of parts of an application can observe the same or
//! overlapping topic filters; the multiplexer issues exactly one network
//! subscribe per distinct filter and unsubscribes when the last observer
//! of that filter is released.
//!
//! ## Features
//!
//! - **Refcounted subscriptions**: one SUBSCRIBE per filter, one UNSUBSCRIBE
//!   when the last observer goes away
//! - **Wildcard routing**: every inbound message reaches every matching
//!   filter (`+`, `#`, `$`-reserved topics)
//! - **Replay mode**: late observers can get the last matching message
//! - **Reconnect handling**: all live filters are resubscribed on every
//!   (re)connect
//! - **Pluggable transport**: `rumqttc` by default, anything implementing
//!   [`Transport`] otherwise
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mqtt_multiplexer::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ServiceConfig {
//!         protocol: "mqtt".to_string(),
//!         ..ServiceConfig::new("localhost", 1883)
//!     };
//!     let service = MqttService::new(config)?;
//!
//!     let mut kitchen = service
//!         .observe("home/kitchen/+", SubscribeOptions::default())
//!         .await?;
//!     let mut everything = service
//!         .observe_retained("home/#", SubscribeOptions::qos(QoS::AtMostOnce))
//!         .await?;
//!
//!     service
//!         .publish("home/kitchen/temp", "21.5", PublishOptions::default())
//!         .await?;
//!
//!     if let Some(Ok(message)) = kitchen.recv().await {
//!         println!("kitchen: {:?}", message.payload);
//!     }
//!     if let Some(Ok(message)) = everything.recv().await {
//!         println!("{}: {:?}", message.topic, message.payload);
//!     }
//!
//!     kitchen.release().await?;
//!     everything.release().await?;
//!     service.disconnect(false).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Filter Matching
//!
//! - `+` matches exactly one non-empty level (`a/+/c` matches `a/b/c`)
//! - `#` matches zero or more trailing levels (`a/#` matches `a`)
//! - a leading `#` never matches topics starting with `$`

#![warn(missing_docs)]

pub mod client;
pub mod connection;
pub mod message;
pub mod routing;
pub mod topic;

// === Core Public API ===
pub use client::{
	ClientSettings, ConnectNotification, ConnectOverrides, Fault,
	MqttService, MqttServiceError, PublishError, ServiceConfig,
	SubackNotification, generate_client_id,
};
pub use connection::{ConnectionState, TransportError};
pub use message::{Message, PublishOptions, SubscribeOptions};
pub use routing::{Delivery, Observer, SubscriptionError, SubscriptionInfo};

// Essential external types
pub use rumqttc::QoS;

// === Transport API ===
pub use connection::{
	PublishRequest, PublishToken, RumqttConnector, SubscribeGrant,
	SubscribeRequest, Transport, TransportConnector, TransportEvent,
	TransportHandle,
};

/// Result type alias for operations that may fail with MqttServiceError
pub type Result<T> = std::result::Result<T, MqttServiceError>;

/// Prelude module for convenient imports
///
/// ```rust
/// use mqtt_multiplexer::prelude::*;
/// ```
pub mod prelude {
	//! Essential types for most applications

	pub use crate::{
		ConnectOverrides, ConnectionState, Message, MqttService,
		MqttServiceError, Observer, PublishOptions, QoS, Result,
		ServiceConfig, SubscribeOptions,
	};
}

/// Error types used throughout the library
///
/// ```rust
/// use mqtt_multiplexer::errors::*;
/// ```
pub mod errors {
	//! All error types used in the library

	pub use crate::connection::TransportError;
	pub use crate::routing::SubscriptionError;
	pub use crate::topic::TopicError;
	pub use crate::{MqttServiceError, PublishError};
}
