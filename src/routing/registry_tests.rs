use arcstr::ArcStr;
use rumqttc::QoS;

use super::registry::{
	AckOutcome, DeliveryMode, Released, SubscriptionRegistry,
};
use crate::connection::{
	PublishRequest, SubscribeGrant, SubscribeRequest, Transport,
	TransportError,
};
use crate::message::SubscribeOptions;

/// Transport double that records every request.
#[derive(Debug, Default)]
pub(crate) struct RecordingTransport {
	pub subscribes: Vec<SubscribeRequest>,
	pub unsubscribes: Vec<ArcStr>,
	pub publishes: Vec<PublishRequest>,
	pub ended: Option<bool>,
	pub reject_requests: bool,
}

impl RecordingTransport {
	fn subscribe_count(&self, filter: &str) -> usize {
		self.subscribes
			.iter()
			.filter(|request| request.filter.as_str() == filter)
			.count()
	}

	fn unsubscribe_count(&self, filter: &str) -> usize {
		self.unsubscribes
			.iter()
			.filter(|unsubscribed| unsubscribed.as_str() == filter)
			.count()
	}
}

impl Transport for RecordingTransport {
	fn subscribe(
		&mut self,
		request: SubscribeRequest,
	) -> Result<(), TransportError> {
		if self.reject_requests {
			return Err(TransportError::Request("queue full".to_string()));
		}
		self.subscribes.push(request);
		Ok(())
	}

	fn unsubscribe(&mut self, filter: &ArcStr) -> Result<(), TransportError> {
		self.unsubscribes.push(filter.clone());
		Ok(())
	}

	fn publish(
		&mut self,
		request: PublishRequest,
	) -> Result<(), TransportError> {
		self.publishes.push(request);
		Ok(())
	}

	fn end(&mut self, force: bool) {
		self.ended = Some(force);
	}
}

fn filter(value: &str) -> ArcStr {
	ArcStr::from(value)
}

#[test]
fn test_n_acquires_issue_one_subscribe() {
	let mut registry = SubscriptionRegistry::new();
	let mut transport = RecordingTransport::default();

	let handles: Vec<_> = (0 .. 5)
		.map(|_| {
			registry
				.acquire(
					filter("a/b"),
					SubscribeOptions::default(),
					DeliveryMode::Live,
					&mut transport,
				)
				.unwrap()
		})
		.collect();

	assert!(handles[0].fresh);
	assert!(handles[1 ..].iter().all(|acquired| !acquired.fresh));
	assert_eq!(transport.subscribe_count("a/b"), 1);
	assert_eq!(registry.get("a/b").unwrap().refcount(), 5);

	// N-1 releases keep the network subscription
	for acquired in &handles[.. 4] {
		let released = registry.release(&acquired.handle, Some(&mut transport));
		assert!(matches!(released, Released::Detached { .. }));
	}
	assert_eq!(transport.unsubscribe_count("a/b"), 0);
	assert_eq!(registry.get("a/b").unwrap().refcount(), 1);

	// the last one removes the entry synchronously
	let released = registry.release(&handles[4].handle, Some(&mut transport));
	assert_eq!(released, Released::Removed);
	assert_eq!(transport.unsubscribe_count("a/b"), 1);
	assert!(!registry.contains("a/b"));
}

#[test]
fn test_first_acquire_fixes_options_and_mode() {
	let mut registry = SubscriptionRegistry::new();
	let mut transport = RecordingTransport::default();

	registry
		.acquire(
			filter("a/#"),
			SubscribeOptions::qos(QoS::ExactlyOnce),
			DeliveryMode::Replay,
			&mut transport,
		)
		.unwrap();
	let joined = registry
		.acquire(
			filter("a/#"),
			SubscribeOptions::qos(QoS::AtMostOnce),
			DeliveryMode::Live,
			&mut transport,
		)
		.unwrap();

	assert_eq!(joined.mode, DeliveryMode::Replay);
	let entry = registry.get("a/#").unwrap();
	assert_eq!(entry.options().qos, QoS::ExactlyOnce);
	assert_eq!(transport.subscribes.len(), 1);
	assert_eq!(transport.subscribes[0].options.qos, QoS::ExactlyOnce);
}

#[test]
fn test_refused_suback_removes_entry() {
	let mut registry = SubscriptionRegistry::new();
	let mut transport = RecordingTransport::default();

	let first = registry
		.acquire(
			filter("forbidden/#"),
			SubscribeOptions::default(),
			DeliveryMode::Live,
			&mut transport,
		)
		.unwrap();
	registry
		.acquire(
			filter("forbidden/#"),
			SubscribeOptions::default(),
			DeliveryMode::Live,
			&mut transport,
		)
		.unwrap();

	let outcome = registry.acknowledge(
		&filter("forbidden/#"),
		first.handle.generation(),
		SubscribeGrant::from_code(SubscribeGrant::REFUSED_CODE),
		&mut transport,
	);
	assert_eq!(outcome, AckOutcome::Refused);
	assert!(!registry.contains("forbidden/#"));
	assert_eq!(transport.unsubscribe_count("forbidden/#"), 1);

	// releasing observers of the refused cycle does nothing
	assert_eq!(
		registry.release(&first.handle, Some(&mut transport)),
		Released::Stale
	);
	assert_eq!(transport.unsubscribe_count("forbidden/#"), 1);

	// a new acquire starts a fresh attempt
	let retry = registry
		.acquire(
			filter("forbidden/#"),
			SubscribeOptions::default(),
			DeliveryMode::Live,
			&mut transport,
		)
		.unwrap();
	assert!(retry.fresh);
	assert_ne!(retry.handle.generation(), first.handle.generation());
	assert_eq!(transport.subscribe_count("forbidden/#"), 2);
}

#[test]
fn test_granted_suback_marks_acknowledged() {
	let mut registry = SubscriptionRegistry::new();
	let mut transport = RecordingTransport::default();
	let acquired = registry
		.acquire(
			filter("a/b"),
			SubscribeOptions::default(),
			DeliveryMode::Live,
			&mut transport,
		)
		.unwrap();
	assert!(!registry.get("a/b").unwrap().is_acknowledged());

	let outcome = registry.acknowledge(
		&filter("a/b"),
		acquired.handle.generation(),
		SubscribeGrant::Granted(QoS::AtLeastOnce),
		&mut transport,
	);
	assert_eq!(outcome, AckOutcome::Granted);
	assert!(registry.get("a/b").unwrap().is_acknowledged());
	assert!(transport.unsubscribes.is_empty());
}

#[test]
fn test_release_then_acquire_creates_new_cycle() {
	let mut registry = SubscriptionRegistry::new();
	let mut transport = RecordingTransport::default();

	let old = registry
		.acquire(
			filter("a/b"),
			SubscribeOptions::default(),
			DeliveryMode::Live,
			&mut transport,
		)
		.unwrap();
	assert_eq!(
		registry.release(&old.handle, Some(&mut transport)),
		Released::Removed
	);

	// re-acquired before the UNSUBACK came back
	let new = registry
		.acquire(
			filter("a/b"),
			SubscribeOptions::default(),
			DeliveryMode::Live,
			&mut transport,
		)
		.unwrap();
	assert!(new.fresh);
	assert_eq!(transport.subscribe_count("a/b"), 2);
	assert_eq!(transport.unsubscribe_count("a/b"), 1);

	// a late refusal addressed to the old cycle must not tear down the new one
	let outcome = registry.acknowledge(
		&filter("a/b"),
		old.handle.generation(),
		SubscribeGrant::Refused,
		&mut transport,
	);
	assert_eq!(outcome, AckOutcome::Stale);
	assert!(registry.contains("a/b"));
	assert_eq!(transport.unsubscribe_count("a/b"), 1);

	// a second release of the old handle must not decrement the new entry
	assert_eq!(
		registry.release(&old.handle, Some(&mut transport)),
		Released::Stale
	);
	assert_eq!(registry.get("a/b").unwrap().refcount(), 1);
}

#[test]
fn test_resubscribe_all_issues_one_per_filter() {
	let mut registry = SubscriptionRegistry::new();
	let mut transport = RecordingTransport::default();
	for value in ["a/b", "a/b", "c/+", "d/#", "d/#", "d/#"] {
		registry
			.acquire(
				filter(value),
				SubscribeOptions::default(),
				DeliveryMode::Live,
				&mut transport,
			)
			.unwrap();
	}
	transport.subscribes.clear();

	let issued = registry.resubscribe_all(&mut transport);
	assert_eq!(issued, 3);
	assert_eq!(transport.subscribes.len(), 3);
	let mut filters: Vec<_> = transport
		.subscribes
		.iter()
		.map(|request| request.filter.to_string())
		.collect();
	filters.sort();
	assert_eq!(filters, vec!["a/b", "c/+", "d/#"]);
}

#[test]
fn test_transport_rejection_leaves_no_entry() {
	let mut registry = SubscriptionRegistry::new();
	let mut transport = RecordingTransport {
		reject_requests: true,
		..Default::default()
	};

	let result = registry.acquire(
		filter("a/b"),
		SubscribeOptions::default(),
		DeliveryMode::Live,
		&mut transport,
	);
	assert!(result.is_err());
	assert!(registry.is_empty());
}

#[test]
fn test_clear_unsubscribes_everything() {
	let mut registry = SubscriptionRegistry::new();
	let mut transport = RecordingTransport::default();
	for value in ["b", "a"] {
		registry
			.acquire(
				filter(value),
				SubscribeOptions::default(),
				DeliveryMode::Live,
				&mut transport,
			)
			.unwrap();
	}

	let removed = registry.clear(Some(&mut transport));
	assert_eq!(removed, vec![filter("a"), filter("b")]);
	assert_eq!(transport.unsubscribes, vec![filter("a"), filter("b")]);
	assert!(registry.is_empty());
}
