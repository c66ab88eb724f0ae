//! Turns transport publish completions into single-shot results.

use std::collections::HashMap;

use arcstr::ArcStr;
use bytes::Bytes;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, warn};

use super::error::PublishError;
use super::notifications::{Fault, notify};
use crate::connection::{PublishRequest, PublishToken, Transport, TransportError};
use crate::message::PublishOptions;

/// Where the outcome of a publish goes.
#[derive(Debug)]
pub(crate) enum Completion {
	/// A caller awaits the result
	Awaited(oneshot::Sender<Result<(), PublishError>>),
	/// Nobody awaits; failures are raised as faults
	Detached,
}

#[derive(Debug)]
struct InFlight {
	topic: ArcStr,
	completion: Completion,
}

/// Publishes in flight, keyed by the token echoed back by the transport.
#[derive(Debug)]
pub(crate) struct PublishGateway {
	next_token: u64,
	in_flight: HashMap<PublishToken, InFlight>,
	faults: broadcast::Sender<Fault>,
}

impl PublishGateway {
	pub fn new(faults: broadcast::Sender<Fault>) -> Self {
		Self {
			next_token: 0,
			in_flight: HashMap::new(),
			faults,
		}
	}

	/// Issues one network publish.
	///
	/// A request the transport refuses outright is resolved immediately.
	pub fn issue(
		&mut self,
		transport: &mut dyn Transport,
		topic: ArcStr,
		payload: Bytes,
		options: PublishOptions,
		completion: Completion,
	) -> PublishToken {
		let token = PublishToken(self.next_token);
		self.next_token = self.next_token.wrapping_add(1);

		let request = PublishRequest {
			topic: topic.clone(),
			payload,
			options,
			token,
		};
		match transport.publish(request) {
			| Ok(()) => {
				debug!(topic = %topic, token = %token, qos = ?options.qos, "Publish issued");
				self.in_flight.insert(token, InFlight { topic, completion });
			}
			| Err(err) => {
				warn!(topic = %topic, error = %err, "Transport rejected publish");
				self.resolve(topic, completion, Err(err));
			}
		}
		token
	}

	/// Resolves the publish behind `token`.
	pub fn complete(
		&mut self,
		token: PublishToken,
		result: Result<(), TransportError>,
	) {
		match self.in_flight.remove(&token) {
			| Some(InFlight { topic, completion }) => {
				self.resolve(topic, completion, result)
			}
			| None => {
				debug!(token = %token, "Completion for unknown publish ignored");
			}
		}
	}

	/// Fails every publish in flight; used when the transport goes away.
	pub fn abandon_all(&mut self) {
		if self.in_flight.is_empty() {
			return;
		}
		warn!(
			in_flight = self.in_flight.len(),
			"Abandoning publishes of a replaced transport"
		);
		for (_, InFlight { topic, completion }) in self.in_flight.drain() {
			match completion {
				| Completion::Awaited(reply) => {
					let _ = reply.send(Err(PublishError::ConnectionReplaced));
				}
				| Completion::Detached => Self::raise_fault(
					&self.faults,
					topic,
					TransportError::Closed,
				),
			}
		}
	}

	/// Number of publishes awaiting completion.
	pub fn in_flight(&self) -> usize {
		self.in_flight.len()
	}

	fn resolve(
		&self,
		topic: ArcStr,
		completion: Completion,
		result: Result<(), TransportError>,
	) {
		match (completion, result) {
			| (Completion::Awaited(reply), result) => {
				if reply.send(result.map_err(PublishError::from)).is_err() {
					debug!(topic = %topic, "Publish caller stopped waiting");
				}
			}
			| (Completion::Detached, Ok(())) => {}
			| (Completion::Detached, Err(err)) => {
				Self::raise_fault(&self.faults, topic, err)
			}
		}
	}

	fn raise_fault(
		faults: &broadcast::Sender<Fault>,
		topic: ArcStr,
		error: TransportError,
	) {
		let fault = Fault::PublishFailed { topic, error };
		error!(fault = %fault, "Unrecoverable fault");
		notify(faults, fault);
	}
}
