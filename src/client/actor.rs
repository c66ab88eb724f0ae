//! The task that owns every piece of multiplexer state.
//!
//! Facade commands, observer releases and transport events are handled one
//! at a time, so registry, router, state machine and publish gateway need no
//! locking. Transport events win over everything else in the select loop:
//! a SUBACK or a close is applied before the next command sees the state.

use std::sync::Arc;

use arcstr::ArcStr;
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{
	self, Receiver, Sender, UnboundedReceiver, UnboundedSender,
};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use super::config::{ClientSettings, ConnectOverrides, ServiceConfig};
use super::error::{MqttServiceError, PublishError};
use super::notifications::{
	ConnectNotification, Notifications, SubackNotification, notify,
};
use super::publisher::{Completion, PublishGateway};
use crate::connection::{
	ConnectionState, ConnectionStateMachine, LifecycleEvent, Transport,
	TransportConnector, TransportError, TransportEvent, TransportHandle,
};
use crate::message::{Message, PublishOptions, SubscribeOptions};
use crate::routing::{
	AckOutcome, DeliveryMode, MessageRouter, Observer, ObserverHandle,
	Released, SubscriptionError, SubscriptionInfo, SubscriptionRegistry,
};

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub(crate) enum Command {
	Connect {
		overrides: ConnectOverrides,
		transport: Option<TransportHandle>,
		reply: Reply<Result<(), MqttServiceError>>,
	},
	Disconnect {
		force: bool,
		reply: Reply<Result<(), MqttServiceError>>,
	},
	Observe {
		filter: ArcStr,
		options: SubscribeOptions,
		mode: DeliveryMode,
		reply: Reply<Result<Observer, MqttServiceError>>,
	},
	Publish {
		topic: ArcStr,
		payload: Bytes,
		options: PublishOptions,
		reply: Reply<Result<(), PublishError>>,
	},
	UnsafePublish {
		topic: ArcStr,
		payload: Bytes,
		options: PublishOptions,
		accepted: Reply<Result<(), PublishError>>,
	},
	Snapshot {
		reply: Reply<Vec<SubscriptionInfo>>,
	},
}

/// Receiving ends handed to the facade.
pub(crate) struct ActorLink {
	pub command_tx: Sender<Command>,
	pub state_rx: watch::Receiver<ConnectionState>,
	pub client_id_rx: watch::Receiver<ArcStr>,
}

pub(crate) struct MultiplexerActor {
	config: ServiceConfig,
	settings: ClientSettings,
	connector: Arc<dyn TransportConnector>,
	registry: SubscriptionRegistry,
	router: MessageRouter,
	state: ConnectionStateMachine,
	gateway: PublishGateway,
	notifications: Notifications,
	client_id_tx: watch::Sender<ArcStr>,
	transport: Option<Box<dyn Transport>>,
	events: Option<UnboundedReceiver<TransportEvent>>,
	command_rx: Receiver<Command>,
	release_tx: UnboundedSender<ObserverHandle>,
	release_rx: UnboundedReceiver<ObserverHandle>,
}

impl MultiplexerActor {
	pub fn spawn(
		runtime: &Handle,
		config: ServiceConfig,
		settings: ClientSettings,
		connector: Arc<dyn TransportConnector>,
		notifications: Notifications,
	) -> ActorLink {
		let (command_tx, command_rx) =
			mpsc::channel(settings.command_channel_capacity.max(1));
		let (release_tx, release_rx) = mpsc::unbounded_channel();
		let (client_id_tx, client_id_rx) =
			watch::channel(ArcStr::from(config.client_id.as_str()));
		let state = ConnectionStateMachine::new();
		let state_rx = state.subscribe();

		let actor = Self {
			config,
			settings,
			connector,
			registry: SubscriptionRegistry::new(),
			router: MessageRouter::new(),
			state,
			gateway: PublishGateway::new(notifications.fault.clone()),
			notifications,
			client_id_tx,
			transport: None,
			events: None,
			command_rx,
			release_tx,
			release_rx,
		};
		runtime.spawn(actor.run());

		ActorLink {
			command_tx,
			state_rx,
			client_id_rx,
		}
	}

	async fn run(mut self) {
		loop {
			tokio::select! {
				biased;
				event = next_event(&mut self.events) => match event {
					| Some(event) => self.handle_event(event),
					| None => self.handle_event_stream_end(),
				},
				Some(handle) = self.release_rx.recv() => {
					self.release_observer(handle);
				}
				command = self.command_rx.recv() => match command {
					| Some(command) => self.handle_command(command),
					| None => {
						info!("Command channel closed, stopping multiplexer");
						break;
					}
				},
			}
		}
		self.shutdown();
	}

	fn handle_command(&mut self, command: Command) {
		match command {
			| Command::Connect {
				overrides,
				transport,
				reply,
			} => {
				let _ = reply.send(self.handle_connect(overrides, transport));
			}
			| Command::Disconnect { force, reply } => {
				let _ = reply.send(self.handle_disconnect(force));
			}
			| Command::Observe {
				filter,
				options,
				mode,
				reply,
			} => {
				// a dropped reply drops the observer, which releases itself
				let _ = reply.send(self.handle_observe(filter, options, mode));
			}
			| Command::Publish {
				topic,
				payload,
				options,
				reply,
			} => match self.transport.as_deref_mut() {
				| Some(transport) => {
					self.gateway.issue(
						transport,
						topic,
						payload,
						options,
						Completion::Awaited(reply),
					);
				}
				| None => {
					let _ = reply.send(Err(PublishError::NotConnected));
				}
			},
			| Command::UnsafePublish {
				topic,
				payload,
				options,
				accepted,
			} => match self.transport.as_deref_mut() {
				| Some(transport) => {
					self.gateway.issue(
						transport,
						topic,
						payload,
						options,
						Completion::Detached,
					);
					let _ = accepted.send(Ok(()));
				}
				| None => {
					let _ = accepted.send(Err(PublishError::NotConnected));
				}
			},
			| Command::Snapshot { reply } => {
				let _ = reply.send(self.registry.snapshot());
			}
		}
	}

	fn handle_connect(
		&mut self,
		overrides: ConnectOverrides,
		supplied: Option<TransportHandle>,
	) -> Result<(), MqttServiceError> {
		self.config = self.config.merged(&overrides);
		self.client_id_tx
			.send_replace(ArcStr::from(self.config.client_id.as_str()));

		if let Some(mut old) = self.transport.take() {
			info!("Tearing down existing transport before reconnecting");
			old.end(true);
		}
		self.events = None;
		self.gateway.abandon_all();

		self.state.apply(LifecycleEvent::ConnectRequested);
		self.state.broadcast();

		let endpoint = self.config.endpoint();
		let opened = match supplied {
			| Some(handle) => Ok(handle),
			| None => {
				self.connector
					.connect(&endpoint, &self.config, &self.settings)
			}
		};
		match opened {
			| Ok(TransportHandle { transport, events }) => {
				info!(
					endpoint = %endpoint,
					client_id = %self.config.client_id,
					"Transport opened"
				);
				self.transport = Some(transport);
				self.events = Some(events);
				Ok(())
			}
			| Err(err) => {
				warn!(endpoint = %endpoint, error = %err, "Failed to open transport");
				notify(&self.notifications.error, err.clone());
				self.enter_closed();
				Err(err.into())
			}
		}
	}

	fn handle_disconnect(
		&mut self,
		force: bool,
	) -> Result<(), MqttServiceError> {
		let Some(mut transport) = self.transport.take() else {
			return Err(MqttServiceError::NotConnected);
		};
		info!(force, "Disconnecting");
		transport.end(force);
		self.events = None;
		self.gateway.abandon_all();
		self.enter_closed();
		Ok(())
	}

	fn handle_observe(
		&mut self,
		filter: ArcStr,
		options: SubscribeOptions,
		mode: DeliveryMode,
	) -> Result<Observer, MqttServiceError> {
		let Some(transport) = self.transport.as_deref_mut() else {
			return Err(MqttServiceError::NotConnected);
		};
		let acquired = self.registry.acquire(filter, options, mode, transport)?;
		let (sender, receiver) = mpsc::unbounded_channel();
		self.router.attach(&acquired, sender);
		Ok(Observer::new(
			receiver,
			self.release_tx.clone(),
			acquired.handle,
		))
	}

	fn release_observer(&mut self, handle: ObserverHandle) {
		if !self.router.detach(&handle) {
			debug!(handle = %handle, "Observer already detached");
			return;
		}
		match self.registry.release(&handle, active(&mut self.transport)) {
			| Released::Removed => {
				self.router.remove(handle.filter());
			}
			| Released::Detached { remaining } => {
				debug!(handle = %handle, remaining, "Observer released");
			}
			| Released::Stale => {
				debug!(handle = %handle, "Release for a stale subscription");
			}
		}
	}

	fn handle_event(&mut self, event: TransportEvent) {
		match event {
			| TransportEvent::Connect { session_present } => {
				self.enter_connected(LifecycleEvent::Connected);
				notify(
					&self.notifications.connect,
					ConnectNotification { session_present },
				);
			}
			| TransportEvent::Reconnect => {
				self.enter_connected(LifecycleEvent::Reconnecting);
				notify(&self.notifications.reconnect, ());
			}
			| TransportEvent::Close => self.enter_closed(),
			| TransportEvent::Error(err) => {
				warn!(error = %err, "Transport error");
				notify(&self.notifications.error, err);
			}
			| TransportEvent::Message(message) => self.handle_message(message),
			| TransportEvent::SubAck {
				filter,
				generation,
				grant,
			} => {
				if let Some(transport) = self.transport.as_deref_mut() {
					let outcome = self.registry.acknowledge(
						&filter, generation, grant, transport,
					);
					if outcome == AckOutcome::Refused {
						let failed = self.router.fail(
							&filter,
							SubscriptionError::Rejected {
								filter: filter.clone(),
							},
						);
						debug!(filter = %filter, observers = failed, "Refusal delivered");
					}
				}
				notify(
					&self.notifications.suback,
					SubackNotification {
						filter,
						granted: grant.is_granted(),
					},
				);
			}
			| TransportEvent::UnsubAck { filter } => {
				debug!(filter = %filter, "Unsubscribe acknowledged");
			}
			| TransportEvent::PubAck { token, result } => {
				self.gateway.complete(token, result)
			}
		}
	}

	fn handle_message(&mut self, message: Message) {
		let message = Arc::new(message);
		notify(&self.notifications.message, Arc::clone(&message));
		let routed = self.router.route(&message);
		for handle in routed.closed {
			self.release_observer(handle);
		}
	}

	/// The transport dropped its event sender without reporting a close.
	fn handle_event_stream_end(&mut self) {
		warn!("Transport event stream ended");
		self.events = None;
		self.transport = None;
		self.gateway.abandon_all();
		if self.state.current() != ConnectionState::Closed {
			notify(&self.notifications.error, TransportError::Closed);
			self.enter_closed();
		}
	}

	/// Applies a (re)connect, resubscribing before anyone sees the new state.
	fn enter_connected(&mut self, event: LifecycleEvent) {
		let transition = self.state.apply(event);
		if transition.resubscribe {
			if let Some(transport) = self.transport.as_deref_mut() {
				self.registry.resubscribe_all(transport);
			}
		}
		self.state.broadcast();
	}

	fn enter_closed(&mut self) {
		self.state.apply(LifecycleEvent::Closed);
		self.state.broadcast();
		notify(&self.notifications.close, ());
	}

	fn shutdown(&mut self) {
		let removed = self.registry.clear(active(&mut self.transport));
		self.router.clear();
		let abandoned = self.gateway.in_flight();
		self.gateway.abandon_all();
		if let Some(mut transport) = self.transport.take() {
			transport.end(false);
		}
		self.events = None;
		if self.state.current() != ConnectionState::Closed {
			self.enter_closed();
		}
		info!(
			unsubscribed = removed.len(),
			abandoned_publishes = abandoned,
			"Multiplexer stopped"
		);
	}
}

fn active(
	transport: &mut Option<Box<dyn Transport>>,
) -> Option<&mut dyn Transport> {
	match transport {
		| Some(transport) => Some(transport.as_mut()),
		| None => None,
	}
}

async fn next_event(
	events: &mut Option<UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
	match events {
		| Some(events) => events.recv().await,
		| None => std::future::pending().await,
	}
}
