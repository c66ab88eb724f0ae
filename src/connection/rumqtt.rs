//! Default [`Transport`] built on `rumqttc`.
//!
//! Requests are queued on an unbounded backlog and a forwarding task hands
//! them to [`AsyncClient`] in order, waiting whenever the rumqttc request
//! channel is full. A driver task polls the [`EventLoop`], learns the packet
//! id rumqttc assigned to each request from the matching outgoing
//! notification, and turns acknowledgments back into [`TransportEvent`]s
//! carrying the filter, generation or token of the original request.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arcstr::ArcStr;
use bytes::Bytes;
use rumqttc::{
	AsyncClient, ClientError, ConnAck, ConnectReturnCode, ConnectionError, Event,
	EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, trace, warn};

use super::error::TransportError;
use super::transport::{
	PublishRequest, PublishToken, SubscribeGrant, SubscribeRequest, Transport,
	TransportConnector, TransportEvent, TransportHandle,
};
use crate::client::config::{ClientSettings, ServiceConfig};
use crate::message::Message;
use crate::routing::Generation;

/// Opens [`RumqttTransport`]s.
///
/// `tcp` and `mqtt` endpoints use a plain TCP socket, `ws` uses a
/// WebSocket. Must be called from within a Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttConnector;

impl TransportConnector for RumqttConnector {
	fn connect(
		&self,
		endpoint: &str,
		config: &ServiceConfig,
		settings: &ClientSettings,
	) -> Result<TransportHandle, TransportError> {
		let options = mqtt_options(endpoint, config)?;
		let (client, mut eventloop) =
			AsyncClient::new(options, settings.event_loop_capacity.max(1));

		let mut network = eventloop.network_options();
		network.set_connection_timeout(
			Duration::from_millis(config.connect_timeout_millis)
				.as_secs()
				.max(1),
		);
		eventloop.set_network_options(network);

		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let correlation = Arc::new(Mutex::new(Correlation::default()));
		let driver = Driver {
			eventloop,
			correlation: Arc::clone(&correlation),
			events: events_tx,
			reconnect_period: Duration::from_millis(
				config.reconnect_period_millis,
			),
			connected: false,
		};
		let driver = tokio::spawn(driver.run());

		let (backlog, backlog_rx) = mpsc::unbounded_channel();
		let forwarder = tokio::spawn(forward(client, backlog_rx));
		debug!(endpoint, client_id = %config.client_id, "rumqttc event loop spawned");

		Ok(TransportHandle::new(
			RumqttTransport {
				backlog,
				correlation,
				driver,
				forwarder,
				disconnecting: false,
			},
			events_rx,
		))
	}
}

fn mqtt_options(
	endpoint: &str,
	config: &ServiceConfig,
) -> Result<MqttOptions, TransportError> {
	if config.client_id.is_empty() || config.client_id.starts_with(' ') {
		return Err(TransportError::Connection(format!(
			"invalid client id '{}'",
			config.client_id
		)));
	}
	let keep_alive = Duration::from_secs(config.keepalive_secs);
	match config.protocol.as_str() {
		| "tcp" | "mqtt" => {
			let mut options = MqttOptions::new(
				config.client_id.clone(),
				config.hostname.clone(),
				config.port,
			);
			options.set_keep_alive(keep_alive);
			Ok(options)
		}
		| "ws" => {
			let mut options = MqttOptions::new(
				config.client_id.clone(),
				endpoint,
				config.port,
			);
			options
				.set_transport(rumqttc::Transport::Ws)
				.set_keep_alive(keep_alive);
			Ok(options)
		}
		| other => Err(TransportError::UnsupportedProtocol(other.to_string())),
	}
}

/// Requests waiting for their packet id, and packet ids waiting for their
/// acknowledgment.
#[derive(Debug, Default)]
struct Correlation {
	queued_subscribes: VecDeque<(ArcStr, Generation)>,
	queued_unsubscribes: VecDeque<ArcStr>,
	queued_publishes: VecDeque<(PublishToken, QoS)>,
	subscribes: HashMap<u16, (ArcStr, Generation)>,
	unsubscribes: HashMap<u16, ArcStr>,
	publishes: HashMap<u16, PublishToken>,
}

impl Correlation {
	/// Forgets packet ids the broker will never acknowledge after a
	/// connection loss. Requests still queued in rumqttc go out after the
	/// reconnect, and publishes with a packet id are retransmitted.
	fn connection_lost(&mut self) {
		self.subscribes.clear();
		self.unsubscribes.clear();
	}
}

fn lock(correlation: &Mutex<Correlation>) -> MutexGuard<'_, Correlation> {
	correlation.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A request waiting to be handed to the rumqttc client.
#[derive(Debug)]
enum Request {
	Subscribe {
		filter: ArcStr,
		qos: QoS,
	},
	Unsubscribe(ArcStr),
	Publish {
		topic: ArcStr,
		qos: QoS,
		retain: bool,
		payload: Bytes,
	},
	Disconnect,
}

/// Feeds the backlog into the client one request at a time.
///
/// Stops after a DISCONNECT, or once the event loop is gone.
async fn forward(client: AsyncClient, mut backlog: UnboundedReceiver<Request>) {
	while let Some(request) = backlog.recv().await {
		let disconnect = matches!(request, Request::Disconnect);
		if let Err(err) = send_request(&client, request).await {
			warn!(error = %err, pending = backlog.len(), "rumqttc event loop gone, dropping queued requests");
			break;
		}
		if disconnect {
			break;
		}
	}
	debug!("rumqttc request forwarder terminated");
}

async fn send_request(
	client: &AsyncClient,
	request: Request,
) -> Result<(), ClientError> {
	match request {
		| Request::Subscribe { filter, qos } => {
			client.subscribe(filter.as_str(), qos).await
		}
		| Request::Unsubscribe(filter) => {
			client.unsubscribe(filter.as_str()).await
		}
		| Request::Publish {
			topic,
			qos,
			retain,
			payload,
		} => {
			client
				.publish(topic.as_str(), qos, retain, payload.to_vec())
				.await
		}
		| Request::Disconnect => client.disconnect().await,
	}
}

/// Request side of a `rumqttc` connection.
pub struct RumqttTransport {
	backlog: UnboundedSender<Request>,
	correlation: Arc<Mutex<Correlation>>,
	driver: JoinHandle<()>,
	forwarder: JoinHandle<()>,
	disconnecting: bool,
}

impl RumqttTransport {
	fn enqueue(&self, request: Request) -> Result<(), TransportError> {
		self.backlog
			.send(request)
			.map_err(|_| TransportError::Closed)
	}

	fn abort(&self) {
		self.forwarder.abort();
		self.driver.abort();
	}
}

impl std::fmt::Debug for RumqttTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RumqttTransport")
			.field("finished", &self.driver.is_finished())
			.finish_non_exhaustive()
	}
}

impl Transport for RumqttTransport {
	fn subscribe(
		&mut self,
		request: SubscribeRequest,
	) -> Result<(), TransportError> {
		// held across the enqueue so correlation order matches backlog order
		let mut correlation = lock(&self.correlation);
		self.enqueue(Request::Subscribe {
			filter: request.filter.clone(),
			qos: request.options.qos,
		})?;
		correlation
			.queued_subscribes
			.push_back((request.filter, request.generation));
		Ok(())
	}

	fn unsubscribe(&mut self, filter: &ArcStr) -> Result<(), TransportError> {
		let mut correlation = lock(&self.correlation);
		self.enqueue(Request::Unsubscribe(filter.clone()))?;
		correlation.queued_unsubscribes.push_back(filter.clone());
		Ok(())
	}

	fn publish(
		&mut self,
		request: PublishRequest,
	) -> Result<(), TransportError> {
		let mut correlation = lock(&self.correlation);
		self.enqueue(Request::Publish {
			topic: request.topic,
			qos: request.options.qos,
			retain: request.options.retain,
			payload: request.payload,
		})?;
		correlation
			.queued_publishes
			.push_back((request.token, request.options.qos));
		Ok(())
	}

	fn end(&mut self, force: bool) {
		if force {
			self.abort();
			return;
		}
		match self.enqueue(Request::Disconnect) {
			| Ok(()) => self.disconnecting = true,
			| Err(err) => {
				warn!(error = %err, "Graceful disconnect failed, aborting event loop");
				self.abort();
			}
		}
	}
}

impl Drop for RumqttTransport {
	fn drop(&mut self) {
		// a queued DISCONNECT still has to reach the broker
		if !self.disconnecting {
			self.abort();
		}
	}
}

struct Driver {
	eventloop: EventLoop,
	correlation: Arc<Mutex<Correlation>>,
	events: UnboundedSender<TransportEvent>,
	reconnect_period: Duration,
	connected: bool,
}

impl Driver {
	async fn run(mut self) {
		loop {
			let keep_going = match self.eventloop.poll().await {
				| Ok(event) => self.handle(event),
				| Err(ConnectionError::RequestsDone) => {
					info!("Client handle dropped, stopping event loop");
					self.close();
					false
				}
				| Err(err) => self.connection_failed(err).await,
			};
			if !keep_going {
				break;
			}
		}
		debug!("rumqttc event loop terminated");
	}

	fn emit(&self, event: TransportEvent) -> bool {
		self.events.send(event).is_ok()
	}

	fn handle(&mut self, event: Event) -> bool {
		match event {
			| Event::Incoming(packet) => self.handle_incoming(packet),
			| Event::Outgoing(outgoing) => self.handle_outgoing(outgoing),
		}
	}

	fn handle_incoming(&mut self, packet: Packet) -> bool {
		match packet {
			| Packet::ConnAck(ConnAck {
				session_present,
				code: ConnectReturnCode::Success,
			}) => {
				info!(session_present, "MQTT connection established");
				self.connected = true;
				self.emit(TransportEvent::Connect { session_present })
			}
			| Packet::ConnAck(ConnAck { code, .. }) => {
				warn!(code = ?code, "MQTT connection rejected by broker");
				self.emit(TransportEvent::Error(TransportError::Refused(
					format!("{code:?}"),
				)))
			}
			| Packet::Publish(publish) => {
				trace!(topic = %publish.topic, payload_size = publish.payload.len(), "Received MQTT message");
				let message = Message {
					topic: ArcStr::from(publish.topic),
					payload: publish.payload,
					qos: publish.qos,
					retain: publish.retain,
				};
				self.emit(TransportEvent::Message(message))
			}
			| Packet::SubAck(suback) => {
				let Some((filter, generation)) =
					lock(&self.correlation).subscribes.remove(&suback.pkid)
				else {
					debug!(pkid = suback.pkid, "SUBACK for unknown packet id");
					return true;
				};
				let grant = match suback.return_codes.first() {
					| Some(SubscribeReasonCode::Success(qos)) => {
						SubscribeGrant::Granted(*qos)
					}
					| Some(SubscribeReasonCode::Failure) | None => {
						SubscribeGrant::Refused
					}
				};
				self.emit(TransportEvent::SubAck {
					filter,
					generation,
					grant,
				})
			}
			| Packet::UnsubAck(unsuback) => {
				match lock(&self.correlation).unsubscribes.remove(&unsuback.pkid)
				{
					| Some(filter) => {
						self.emit(TransportEvent::UnsubAck { filter })
					}
					| None => true,
				}
			}
			| Packet::PubAck(rumqttc::PubAck { pkid })
			| Packet::PubComp(rumqttc::PubComp { pkid }) => {
				match lock(&self.correlation).publishes.remove(&pkid) {
					| Some(token) => self.emit(TransportEvent::PubAck {
						token,
						result: Ok(()),
					}),
					| None => true,
				}
			}
			| Packet::Disconnect => {
				info!("Received MQTT Disconnect packet from server");
				self.close()
			}
			| other => {
				trace!(packet = ?other, "Ignored MQTT packet");
				true
			}
		}
	}

	fn handle_outgoing(&mut self, outgoing: Outgoing) -> bool {
		let mut correlation = lock(&self.correlation);
		match outgoing {
			| Outgoing::Subscribe(pkid) => {
				if let Some(request) = correlation.queued_subscribes.pop_front()
				{
					correlation.subscribes.insert(pkid, request);
				}
				true
			}
			| Outgoing::Unsubscribe(pkid) => {
				if let Some(filter) = correlation.queued_unsubscribes.pop_front()
				{
					correlation.unsubscribes.insert(pkid, filter);
				}
				true
			}
			| Outgoing::Publish(pkid) => {
				if pkid != 0 && correlation.publishes.contains_key(&pkid) {
					trace!(pkid, "Publish retransmitted");
					return true;
				}
				match correlation.queued_publishes.pop_front() {
					| Some((token, QoS::AtMostOnce)) => {
						drop(correlation);
						self.emit(TransportEvent::PubAck {
							token,
							result: Ok(()),
						})
					}
					| Some((token, _)) => {
						correlation.publishes.insert(pkid, token);
						true
					}
					| None => true,
				}
			}
			| Outgoing::Disconnect => {
				drop(correlation);
				info!("Sent MQTT Disconnect packet to server");
				self.close();
				false
			}
			| other => {
				trace!(outgoing = ?other, "Outgoing MQTT packet");
				true
			}
		}
	}

	/// Reports the failure and waits before the next connection attempt.
	/// Returns `false` when reconnecting is disabled.
	async fn connection_failed(&mut self, err: ConnectionError) -> bool {
		error!(error = %err, "MQTT event loop error");
		lock(&self.correlation).connection_lost();
		if !self.emit(TransportEvent::Error(err.into())) {
			return false;
		}
		if self.connected && !self.close() {
			return false;
		}
		if self.reconnect_period.is_zero() {
			info!("Reconnecting disabled, stopping event loop");
			return false;
		}

		debug!(delay = ?self.reconnect_period, "Waiting before reconnecting");
		time::sleep(self.reconnect_period).await;
		warn!("Reconnecting to MQTT broker");
		self.emit(TransportEvent::Reconnect)
	}

	fn close(&mut self) -> bool {
		self.connected = false;
		self.emit(TransportEvent::Close)
	}
}
