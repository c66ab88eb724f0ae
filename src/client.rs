//! Client module
//!
//! The public [`MqttService`] facade, its configuration and errors, and the
//! task that owns all multiplexer state.

mod actor;
pub mod config;
pub mod error;
pub mod notifications;
pub(crate) mod publisher;
pub mod service;

pub use config::{
	ClientSettings, ConnectOverrides, ServiceConfig, generate_client_id,
};
pub use error::{MqttServiceError, PublishError};
pub use notifications::{ConnectNotification, Fault, SubackNotification};
pub use service::MqttService;
