//! Fans inbound messages out to every matching live filter.

use std::collections::BTreeMap;
use std::sync::Arc;

use arcstr::ArcStr;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

use super::error::SubscriptionError;
use super::registry::{
	Acquired, DeliveryMode, Generation, ObserverHandle, ObserverId,
};
use crate::message::Message;
use crate::topic::matches;

/// What an observer receives: a message, or the terminal failure of its
/// subscription.
pub type Delivery = Result<Arc<Message>, SubscriptionError>;

#[derive(Debug)]
struct Route {
	generation: Generation,
	mode: DeliveryMode,
	observers: BTreeMap<ObserverId, UnboundedSender<Delivery>>,
	last: Option<Arc<Message>>,
}

impl Route {
	fn new(generation: Generation, mode: DeliveryMode) -> Self {
		Self {
			generation,
			mode,
			observers: BTreeMap::new(),
			last: None,
		}
	}
}

/// Outcome of routing one message.
#[derive(Debug, Default)]
pub struct Routed {
	/// Filters that matched the topic
	pub matched: usize,
	/// Observers the message was handed to
	pub delivered: usize,
	/// Observers whose receiving side is gone and should be released
	pub closed: Vec<ObserverHandle>,
}

/// Observer sets and replay caches of all live filters.
#[derive(Debug, Default)]
pub struct MessageRouter {
	routes: BTreeMap<ArcStr, Route>,
}

impl MessageRouter {
	/// Creates a router with no live filters.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds the observer from `acquired`.
	///
	/// In replay mode the cached last message, if any, is delivered right
	/// away.
	pub fn attach(
		&mut self,
		acquired: &Acquired,
		sender: UnboundedSender<Delivery>,
	) {
		let handle = &acquired.handle;
		let route = self
			.routes
			.entry(handle.filter().clone())
			.or_insert_with(|| Route::new(handle.generation(), acquired.mode));
		if route.generation != handle.generation() {
			debug!(
				filter = %handle.filter(),
				old_generation = %route.generation,
				"Replacing route left over from an earlier subscription cycle"
			);
			*route = Route::new(handle.generation(), acquired.mode);
		}
		if route.mode == DeliveryMode::Replay {
			if let Some(last) = &route.last {
				trace!(filter = %handle.filter(), topic = %last.topic, "Replaying last message");
				let _ = sender.send(Ok(Arc::clone(last)));
			}
		}
		route.observers.insert(handle.observer(), sender);
	}

	/// Removes one observer, keeping the route.
	pub fn detach(&mut self, handle: &ObserverHandle) -> bool {
		self.routes
			.get_mut(handle.filter())
			.filter(|route| route.generation == handle.generation())
			.and_then(|route| route.observers.remove(&handle.observer()))
			.is_some()
	}

	/// Drops the route for `filter`, ending every observer stream on it and
	/// discarding its cached message.
	pub fn remove(&mut self, filter: &str) -> bool {
		self.routes.remove(filter).is_some()
	}

	/// Delivers `error` to every observer of `filter`, then removes the
	/// route. Returns the number of observers notified.
	pub fn fail(&mut self, filter: &str, error: SubscriptionError) -> usize {
		let Some(route) = self.routes.remove(filter) else {
			return 0;
		};
		route
			.observers
			.values()
			.filter(|sender| sender.send(Err(error.clone())).is_ok())
			.count()
	}

	/// Delivers `message` to every observer of every matching filter.
	pub fn route(&mut self, message: &Arc<Message>) -> Routed {
		let mut routed = Routed::default();
		for (filter, route) in self.routes.iter_mut() {
			if !matches(filter, &message.topic) {
				continue;
			}
			routed.matched += 1;
			if route.mode == DeliveryMode::Replay {
				route.last = Some(Arc::clone(message));
			}
			for (id, sender) in &route.observers {
				if sender.send(Ok(Arc::clone(message))).is_ok() {
					routed.delivered += 1;
				} else {
					routed.closed.push(ObserverHandle::new(
						filter.clone(),
						route.generation,
						*id,
					));
				}
			}
		}
		trace!(
			topic = %message.topic,
			matched = routed.matched,
			delivered = routed.delivered,
			"Routed message"
		);
		routed
	}

	/// Drops every route.
	pub fn clear(&mut self) {
		self.routes.clear();
	}

	/// Live filters in ascending order.
	pub fn filters(&self) -> impl Iterator<Item = &ArcStr> {
		self.routes.keys()
	}

	/// Observers attached to `filter`.
	pub fn observer_count(&self, filter: &str) -> usize {
		self.routes.get(filter).map_or(0, |route| route.observers.len())
	}

	/// Cached last message of a replay-mode filter.
	pub fn cached(&self, filter: &str) -> Option<Arc<Message>> {
		self.routes.get(filter).and_then(|route| route.last.clone())
	}
}
