//! [`MqttService`], the public handle to a shared MQTT connection.

use std::sync::Arc;

use arcstr::ArcStr;
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info};

use super::actor::{ActorLink, Command, MultiplexerActor};
use super::config::{ClientSettings, ConnectOverrides, ServiceConfig};
use super::error::{MqttServiceError, PublishError};
use super::notifications::{
	ConnectNotification, Fault, Notifications, SubackNotification,
};
use crate::connection::{
	ConnectionState, RumqttConnector, TransportConnector, TransportError,
	TransportHandle,
};
use crate::message::{Message, PublishOptions, SubscribeOptions};
use crate::routing::{DeliveryMode, Observer, SubscriptionInfo};
use crate::topic::validation::{validate_filter, validate_topic};

/// Shares one MQTT connection between any number of observers.
///
/// Cloning is cheap; every clone talks to the same multiplexer task. The
/// task stops, unsubscribing everything and ending the transport, once the
/// last clone is dropped.
///
/// ```rust,no_run
/// use mqtt_multiplexer::{MqttService, PublishOptions, ServiceConfig};
///
/// # async fn demo() -> mqtt_multiplexer::Result<()> {
/// let service = MqttService::new(ServiceConfig::new("localhost", 1884))?;
/// let mut observer = service.observe("sensors/+", Default::default()).await?;
/// service
/// 	.publish("sensors/kitchen", "21.5", PublishOptions::default())
/// 	.await?;
/// if let Some(Ok(message)) = observer.recv().await {
/// 	println!("{}: {:?}", message.topic, message.payload);
/// }
/// observer.release().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MqttService {
	command_tx: mpsc::Sender<Command>,
	notifications: Notifications,
	state_rx: watch::Receiver<ConnectionState>,
	client_id_rx: watch::Receiver<ArcStr>,
}

impl MqttService {
	/// Creates a service using the `rumqttc` transport.
	///
	/// Must be called from within a Tokio runtime. Connects right away
	/// unless `config.connect_on_create` is `false`.
	pub fn new(config: ServiceConfig) -> Result<Self, MqttServiceError> {
		Self::with_settings(config, ClientSettings::default())
	}

	/// Like [`new`](Self::new) with custom channel sizes.
	pub fn with_settings(
		config: ServiceConfig,
		settings: ClientSettings,
	) -> Result<Self, MqttServiceError> {
		Self::with_connector(config, settings, Arc::new(RumqttConnector))
	}

	/// Creates a service whose transports are opened by `connector`.
	pub fn with_connector(
		config: ServiceConfig,
		settings: ClientSettings,
		connector: Arc<dyn TransportConnector>,
	) -> Result<Self, MqttServiceError> {
		let runtime = Handle::try_current()
			.map_err(|err| MqttServiceError::NoRuntime(err.to_string()))?;
		let connect_on_create = config.connect_on_create;
		let notifications = Notifications::new(settings.notification_capacity);
		let ActorLink {
			command_tx,
			state_rx,
			client_id_rx,
		} = MultiplexerActor::spawn(
			&runtime,
			config,
			settings,
			connector,
			notifications.clone(),
		);

		if connect_on_create {
			// nobody waits for the outcome; failures reach on_error()
			let (reply, _) = oneshot::channel();
			command_tx
				.try_send(Command::Connect {
					overrides: ConnectOverrides::default(),
					transport: None,
					reply,
				})
				.map_err(|_| MqttServiceError::ChannelClosed)?;
		}
		let client_id = client_id_rx.borrow().clone();
		info!(client_id = %client_id, connect_on_create, "MQTT service created");

		Ok(Self {
			command_tx,
			notifications,
			state_rx,
			client_id_rx,
		})
	}

	/// Opens a new transport, replacing any existing one.
	///
	/// `overrides` are merged into the current configuration and kept for
	/// later connects. When `transport` is `None` the configured connector
	/// opens one. Returns once the transport exists; the broker handshake
	/// is reported through [`state`](Self::state) and
	/// [`on_connect`](Self::on_connect).
	pub async fn connect(
		&self,
		overrides: ConnectOverrides,
		transport: Option<TransportHandle>,
	) -> Result<(), MqttServiceError> {
		self.request(|reply| Command::Connect {
			overrides,
			transport,
			reply,
		})
		.await?
	}

	/// Ends the transport. Fails with `NotConnected` if there is none.
	///
	/// Observers stay attached and are resubscribed by the next `connect()`.
	pub async fn disconnect(&self, force: bool) -> Result<(), MqttServiceError> {
		self.request(|reply| Command::Disconnect { force, reply })
			.await?
	}

	/// Observes `filter`, receiving only messages that arrive from now on.
	pub async fn observe(
		&self,
		filter: &str,
		options: SubscribeOptions,
	) -> Result<Observer, MqttServiceError> {
		self.observe_with_mode(filter, options, DeliveryMode::Live)
			.await
	}

	/// Observes `filter`; a late observer immediately gets the last
	/// matching message if one is cached.
	///
	/// The first observer of a filter decides whether it caches at all.
	pub async fn observe_retained(
		&self,
		filter: &str,
		options: SubscribeOptions,
	) -> Result<Observer, MqttServiceError> {
		self.observe_with_mode(filter, options, DeliveryMode::Replay)
			.await
	}

	async fn observe_with_mode(
		&self,
		filter: &str,
		options: SubscribeOptions,
		mode: DeliveryMode,
	) -> Result<Observer, MqttServiceError> {
		validate_filter(filter)?;
		debug!(filter, qos = ?options.qos, mode = ?mode, "Observe requested");
		self.request(|reply| Command::Observe {
			filter: ArcStr::from(filter),
			options,
			mode,
			reply,
		})
		.await?
	}

	/// Publishes and waits for the transport to complete the request.
	pub async fn publish(
		&self,
		topic: &str,
		payload: impl Into<Bytes>,
		options: PublishOptions,
	) -> Result<(), PublishError> {
		validate_topic(topic)?;
		let (reply, response) = oneshot::channel();
		self.command_tx
			.send(Command::Publish {
				topic: ArcStr::from(topic),
				payload: payload.into(),
				options,
				reply,
			})
			.await
			.map_err(|_| PublishError::ChannelClosed)?;
		response.await.map_err(|_| PublishError::ResponseLost)?
	}

	/// Publishes without waiting for completion.
	///
	/// Only rejects requests that cannot be issued at all. A failure
	/// reported later by the transport is raised on [`faults`](Self::faults).
	pub async fn unsafe_publish(
		&self,
		topic: &str,
		payload: impl Into<Bytes>,
		options: PublishOptions,
	) -> Result<(), PublishError> {
		validate_topic(topic)?;
		let (accepted, response) = oneshot::channel();
		self.command_tx
			.send(Command::UnsafePublish {
				topic: ArcStr::from(topic),
				payload: payload.into(),
				options,
				accepted,
			})
			.await
			.map_err(|_| PublishError::ChannelClosed)?;
		response.await.map_err(|_| PublishError::ResponseLost)?
	}

	/// Client identifier of the current or most recent connection.
	pub fn client_id(&self) -> ArcStr {
		self.client_id_rx.borrow().clone()
	}

	/// Connection state; the receiver starts with the current value.
	pub fn state(&self) -> watch::Receiver<ConnectionState> {
		self.state_rx.clone()
	}

	/// Every established connection.
	pub fn on_connect(&self) -> broadcast::Receiver<ConnectNotification> {
		self.notifications.connect.subscribe()
	}

	/// Every closed connection.
	pub fn on_close(&self) -> broadcast::Receiver<()> {
		self.notifications.close.subscribe()
	}

	/// Transport errors. None of them are returned from a call.
	pub fn on_error(&self) -> broadcast::Receiver<TransportError> {
		self.notifications.error.subscribe()
	}

	/// Reconnect attempts made by the transport on its own.
	pub fn on_reconnect(&self) -> broadcast::Receiver<()> {
		self.notifications.reconnect.subscribe()
	}

	/// Every inbound message, matched or not.
	pub fn on_message(&self) -> broadcast::Receiver<Arc<Message>> {
		self.notifications.message.subscribe()
	}

	/// Every SUBACK, granted or refused.
	pub fn on_suback(&self) -> broadcast::Receiver<SubackNotification> {
		self.notifications.suback.subscribe()
	}

	/// Failures of [`unsafe_publish`](Self::unsafe_publish) calls.
	pub fn faults(&self) -> broadcast::Receiver<Fault> {
		self.notifications.fault.subscribe()
	}

	/// Live shared subscriptions in filter order.
	pub async fn subscriptions(
		&self,
	) -> Result<Vec<SubscriptionInfo>, MqttServiceError> {
		self.request(|reply| Command::Snapshot { reply }).await
	}

	async fn request<R>(
		&self,
		command: impl FnOnce(oneshot::Sender<R>) -> Command,
	) -> Result<R, MqttServiceError> {
		let (reply, response) = oneshot::channel();
		self.command_tx
			.send(command(reply))
			.await
			.map_err(|_| MqttServiceError::ChannelClosed)?;
		response.await.map_err(|_| MqttServiceError::ResponseLost)
	}
}
