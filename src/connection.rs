//! Connection management module
//!
//! The transport abstraction the multiplexer drives, the connection state
//! machine, and the default transport built on `rumqttc`.

pub mod error;
pub mod rumqtt;
pub mod state;
pub mod transport;

pub use error::TransportError;
pub use rumqtt::{RumqttConnector, RumqttTransport};
pub use state::{ConnectionState, ConnectionStateMachine, LifecycleEvent};
pub use transport::{
	PublishRequest, PublishToken, SubscribeGrant, SubscribeRequest, Transport,
	TransportConnector, TransportEvent, TransportHandle,
};
