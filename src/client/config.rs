//! Configuration for the multiplexer and its transport

use rand::Rng;
use serde::Deserialize;

/// Alphabet of generated client identifiers.
const CLIENT_ID_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const CLIENT_ID_SUFFIX_LEN: usize = 19;

/// Generates `"client-"` followed by 19 random base-36 characters.
pub fn generate_client_id() -> String {
	let mut rng = rand::rng();
	let suffix: String = (0 .. CLIENT_ID_SUFFIX_LEN)
		.map(|_| {
			CLIENT_ID_ALPHABET[rng.random_range(0 .. CLIENT_ID_ALPHABET.len())]
				as char
		})
		.collect();
	format!("client-{suffix}")
}

/// Connection options of a [`MqttService`](crate::MqttService).
///
/// Every field has a default, so partial documents deserialize:
///
/// ```
/// let config: mqtt_multiplexer::ServiceConfig =
/// 	serde_json::from_str(r#"{ "hostname": "broker.local", "port": 1883 }"#)
/// 		.unwrap();
/// assert_eq!(config.protocol, "ws");
/// assert_eq!(config.endpoint(), "ws://broker.local:1883//");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
	/// URL scheme of the endpoint
	pub protocol: String,
	/// Broker host
	pub hostname: String,
	/// Broker port
	pub port: u16,
	/// Path appended after the port
	pub path: String,
	/// Connect as soon as the service is created
	pub connect_on_create: bool,
	/// Client identifier sent to the broker
	pub client_id: String,
	/// Keepalive interval in seconds
	pub keepalive_secs: u64,
	/// Connection establishment timeout in milliseconds
	pub connect_timeout_millis: u64,
	/// Delay between reconnect attempts in milliseconds, 0 disables
	/// reconnecting
	pub reconnect_period_millis: u64,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			protocol: "ws".to_string(),
			hostname: "localhost".to_string(),
			port: 1884,
			path: "/".to_string(),
			connect_on_create: true,
			client_id: generate_client_id(),
			keepalive_secs: 10,
			connect_timeout_millis: 10_000,
			reconnect_period_millis: 10_000,
		}
	}
}

impl ServiceConfig {
	/// Config for `host:port` with everything else defaulted.
	pub fn new(hostname: impl Into<String>, port: u16) -> Self {
		Self {
			hostname: hostname.into(),
			port,
			..Self::default()
		}
	}

	/// Config that waits for an explicit `connect()`.
	pub fn manual(mut self) -> Self {
		self.connect_on_create = false;
		self
	}

	/// Endpoint URL: `<protocol>://<hostname>:<port>/<path>`.
	pub fn endpoint(&self) -> String {
		format!(
			"{}://{}:{}/{}",
			self.protocol, self.hostname, self.port, self.path
		)
	}

	/// Returns a copy with every field set in `overrides` replaced.
	pub fn merged(&self, overrides: &ConnectOverrides) -> Self {
		let ConnectOverrides {
			protocol,
			hostname,
			port,
			path,
			client_id,
			keepalive_secs,
			connect_timeout_millis,
			reconnect_period_millis,
		} = overrides.clone();
		Self {
			protocol: protocol.unwrap_or_else(|| self.protocol.clone()),
			hostname: hostname.unwrap_or_else(|| self.hostname.clone()),
			port: port.unwrap_or(self.port),
			path: path.unwrap_or_else(|| self.path.clone()),
			connect_on_create: self.connect_on_create,
			client_id: client_id.unwrap_or_else(|| self.client_id.clone()),
			keepalive_secs: keepalive_secs.unwrap_or(self.keepalive_secs),
			connect_timeout_millis: connect_timeout_millis
				.unwrap_or(self.connect_timeout_millis),
			reconnect_period_millis: reconnect_period_millis
				.unwrap_or(self.reconnect_period_millis),
		}
	}
}

/// Per-call overrides for `connect()`; unset fields keep the base value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectOverrides {
	/// URL scheme
	pub protocol: Option<String>,
	/// Broker host
	pub hostname: Option<String>,
	/// Broker port
	pub port: Option<u16>,
	/// Endpoint path
	pub path: Option<String>,
	/// Client identifier
	pub client_id: Option<String>,
	/// Keepalive in seconds
	pub keepalive_secs: Option<u64>,
	/// Connect timeout in milliseconds
	pub connect_timeout_millis: Option<u64>,
	/// Reconnect period in milliseconds
	pub reconnect_period_millis: Option<u64>,
}

/// Channel sizes and other in-process tuning
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
	/// Capacity of the facade → multiplexer command channel
	pub command_channel_capacity: usize,
	/// Capacity of each notification broadcast channel
	pub notification_capacity: usize,
	/// Capacity of the rumqttc request channel
	pub event_loop_capacity: usize,
}

impl Default for ClientSettings {
	fn default() -> Self {
		Self {
			command_channel_capacity: 100,
			notification_capacity: 64,
			event_loop_capacity: 10,
		}
	}
}
