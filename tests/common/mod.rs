//! In-memory transport shared by the integration tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arcstr::ArcStr;
use bytes::Bytes;
use mqtt_multiplexer::connection::ConnectionState;
use mqtt_multiplexer::{
	ClientSettings, ConnectOverrides, Message, MqttService, PublishRequest,
	PublishToken, ServiceConfig, SubscribeGrant, SubscribeRequest, Transport,
	TransportConnector, TransportError, TransportEvent, TransportHandle,
};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

/// Installs a test subscriber when `RUST_LOG` is set.
pub fn init_tracing() {
	if std::env::var("RUST_LOG").is_ok() {
		let _ = tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_test_writer()
			.compact()
			.try_init();
	}
}

/// Everything a [`MockTransport`] was asked to do.
#[derive(Debug, Default)]
pub struct Recorded {
	pub subscribes: Vec<SubscribeRequest>,
	pub unsubscribes: Vec<ArcStr>,
	pub publishes: Vec<PublishRequest>,
	pub ended: Option<bool>,
}

#[derive(Debug)]
struct MockTransport {
	log: Arc<Mutex<Recorded>>,
}

impl Transport for MockTransport {
	fn subscribe(
		&mut self,
		request: SubscribeRequest,
	) -> Result<(), TransportError> {
		lock(&self.log).subscribes.push(request);
		Ok(())
	}

	fn unsubscribe(&mut self, filter: &ArcStr) -> Result<(), TransportError> {
		lock(&self.log).unsubscribes.push(filter.clone());
		Ok(())
	}

	fn publish(
		&mut self,
		request: PublishRequest,
	) -> Result<(), TransportError> {
		lock(&self.log).publishes.push(request);
		Ok(())
	}

	fn end(&mut self, force: bool) {
		lock(&self.log).ended = Some(force);
	}
}

fn lock(log: &Mutex<Recorded>) -> MutexGuard<'_, Recorded> {
	log.lock().unwrap()
}

/// Broker side of one mock connection: sees every request, emits events.
#[derive(Debug, Clone)]
pub struct MockBroker {
	log: Arc<Mutex<Recorded>>,
	events: UnboundedSender<TransportEvent>,
}

impl MockBroker {
	/// Creates a broker and the transport handle to pass to `connect()`.
	pub fn new() -> (Self, TransportHandle) {
		let log = Arc::new(Mutex::new(Recorded::default()));
		let (events, events_rx) = unbounded_channel();
		let transport = MockTransport {
			log: Arc::clone(&log),
		};
		(Self { log, events }, TransportHandle::new(transport, events_rx))
	}

	pub fn emit(&self, event: TransportEvent) {
		let _ = self.events.send(event);
	}

	pub fn accept_connection(&self) {
		self.emit(TransportEvent::Connect {
			session_present: false,
		});
	}

	pub fn deliver(&self, topic: &str, payload: &'static str) {
		self.emit(TransportEvent::Message(Message::new(
			ArcStr::from(topic),
			Bytes::from_static(payload.as_bytes()),
		)));
	}

	pub fn suback(&self, request: &SubscribeRequest, grant: SubscribeGrant) {
		self.emit(TransportEvent::SubAck {
			filter: request.filter.clone(),
			generation: request.generation,
			grant,
		});
	}

	pub fn puback(&self, token: PublishToken, result: Result<(), TransportError>) {
		self.emit(TransportEvent::PubAck { token, result });
	}

	pub fn subscribes(&self) -> Vec<SubscribeRequest> {
		lock(&self.log).subscribes.clone()
	}

	pub fn last_subscribe(&self, filter: &str) -> SubscribeRequest {
		self.subscribes()
			.into_iter()
			.rev()
			.find(|request| request.filter.as_str() == filter)
			.unwrap()
	}

	pub fn subscribe_count(&self, filter: &str) -> usize {
		lock(&self.log)
			.subscribes
			.iter()
			.filter(|request| request.filter.as_str() == filter)
			.count()
	}

	pub fn unsubscribe_count(&self, filter: &str) -> usize {
		lock(&self.log)
			.unsubscribes
			.iter()
			.filter(|unsubscribed| unsubscribed.as_str() == filter)
			.count()
	}

	pub fn publishes(&self) -> Vec<PublishRequest> {
		lock(&self.log).publishes.clone()
	}

	pub fn ended(&self) -> Option<bool> {
		lock(&self.log).ended
	}
}

/// Connector that opens [`MockBroker`] connections, or fails.
#[derive(Debug, Default)]
pub struct MockConnector {
	pub endpoints: Mutex<Vec<String>>,
	pub brokers: Mutex<Vec<MockBroker>>,
	pub failure: Option<TransportError>,
}

impl MockConnector {
	pub fn failing(error: TransportError) -> Self {
		Self {
			failure: Some(error),
			..Self::default()
		}
	}

	pub fn broker(&self, index: usize) -> Option<MockBroker> {
		self.brokers.lock().unwrap().get(index).cloned()
	}
}

impl TransportConnector for MockConnector {
	fn connect(
		&self,
		endpoint: &str,
		_config: &ServiceConfig,
		_settings: &ClientSettings,
	) -> Result<TransportHandle, TransportError> {
		self.endpoints.lock().unwrap().push(endpoint.to_string());
		if let Some(error) = &self.failure {
			return Err(error.clone());
		}
		let (broker, handle) = MockBroker::new();
		self.brokers.lock().unwrap().push(broker);
		Ok(handle)
	}
}

/// Service that waits for an explicit `connect()`.
pub fn manual_service(connector: Arc<MockConnector>) -> MqttService {
	init_tracing();
	MqttService::with_connector(
		ServiceConfig::default().manual(),
		ClientSettings::default(),
		connector,
	)
	.unwrap()
}

/// Service connected to a fresh broker that already accepted the session.
pub async fn connected_service() -> (MqttService, MockBroker) {
	let service = manual_service(Arc::new(MockConnector::default()));
	let (broker, handle) = MockBroker::new();
	service
		.connect(ConnectOverrides::default(), Some(handle))
		.await
		.unwrap();
	broker.accept_connection();
	settle(&service).await;
	assert_eq!(*service.state().borrow(), ConnectionState::Connected);
	(service, broker)
}

/// Round-trips through the multiplexer so every event, release and command
/// queued before this call has been handled.
pub async fn settle(service: &MqttService) {
	service.subscriptions().await.unwrap();
}

/// Polls `condition` until it holds or a second has passed.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
	for _ in 0 .. 200 {
		if condition() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("condition not met in time");
}
