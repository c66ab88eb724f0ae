//! Refcounted table of filter → shared subscription.
//!
//! The registry alone decides when a network-level subscribe or unsubscribe
//! is issued. Every entry lives for one acquire/release cycle and is tagged
//! with a [`Generation`]; handles and acknowledgments from an earlier cycle
//! of the same filter string never touch a later one.

use std::collections::BTreeMap;
use std::fmt;

use arcstr::ArcStr;
use rumqttc::QoS;
use tracing::{debug, error, info, warn};

use super::error::SubscriptionError;
use crate::connection::{SubscribeGrant, SubscribeRequest, Transport};
use crate::message::SubscribeOptions;

/// Identifies one acquire/release cycle of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

impl Generation {
	/// Creates a generation from a raw value. Mostly useful for test
	/// transports.
	pub fn from_raw(raw: u64) -> Self {
		Self(raw)
	}

	/// Raw generation value.
	pub fn as_u64(&self) -> u64 {
		self.0
	}
}

impl fmt::Display for Generation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Generation({})", self.0)
	}
}

/// Identifies one attached observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ObserverId({})", self.0)
	}
}

/// Whether late observers get the last matching message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
	/// Only messages arriving after attachment
	#[default]
	Live,
	/// Late observers immediately receive the cached last message
	Replay,
}

/// Ties an observer to the entry cycle it attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObserverHandle {
	filter: ArcStr,
	generation: Generation,
	observer: ObserverId,
}

impl ObserverHandle {
	pub(crate) fn new(
		filter: ArcStr,
		generation: Generation,
		observer: ObserverId,
	) -> Self {
		Self {
			filter,
			generation,
			observer,
		}
	}

	/// Filter the observer is attached to.
	pub fn filter(&self) -> &ArcStr {
		&self.filter
	}

	/// Entry cycle the observer is attached to.
	pub fn generation(&self) -> Generation {
		self.generation
	}

	/// Observer identity within the entry.
	pub fn observer(&self) -> ObserverId {
		self.observer
	}
}

impl fmt::Display for ObserverHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}@{}#{}", self.filter, self.generation.0, self.observer.0)
	}
}

/// One shared subscription.
#[derive(Debug)]
pub struct SubscriptionEntry {
	filter: ArcStr,
	options: SubscribeOptions,
	refcount: usize,
	acknowledged: bool,
	failed: bool,
	generation: Generation,
	mode: DeliveryMode,
}

impl SubscriptionEntry {
	/// Filter of this entry.
	pub fn filter(&self) -> &ArcStr {
		&self.filter
	}

	/// Options used for every network subscribe of this entry.
	pub fn options(&self) -> SubscribeOptions {
		self.options
	}

	/// Number of attached observers.
	pub fn refcount(&self) -> usize {
		self.refcount
	}

	/// The broker granted the subscription at least once.
	pub fn is_acknowledged(&self) -> bool {
		self.acknowledged
	}

	/// The broker refused the subscription.
	pub fn is_failed(&self) -> bool {
		self.failed
	}

	/// Cycle this entry belongs to.
	pub fn generation(&self) -> Generation {
		self.generation
	}

	/// Delivery mode fixed by the first observer.
	pub fn mode(&self) -> DeliveryMode {
		self.mode
	}

	fn request(&self) -> SubscribeRequest {
		SubscribeRequest {
			filter: self.filter.clone(),
			options: self.options,
			generation: self.generation,
		}
	}
}

/// Read-only view of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
	/// Filter string
	pub filter: ArcStr,
	/// Requested QoS
	pub qos: QoS,
	/// Attached observers
	pub refcount: usize,
	/// Granted by the broker at least once
	pub acknowledged: bool,
	/// Late observers receive the last message
	pub replay: bool,
}

/// Result of [`SubscriptionRegistry::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
	/// Handle for the new observer
	pub handle: ObserverHandle,
	/// A new entry was created and a network subscribe issued
	pub fresh: bool,
	/// Delivery mode of the entry the observer joined
	pub mode: DeliveryMode,
}

/// Result of [`SubscriptionRegistry::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
	/// Observer detached; the entry lives on
	Detached {
		/// Observers still attached
		remaining: usize,
	},
	/// Last observer gone; entry removed and unsubscribe issued
	Removed,
	/// Handle belongs to an entry cycle that no longer exists
	Stale,
}

/// Result of [`SubscriptionRegistry::acknowledge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
	/// Broker granted the subscription
	Granted,
	/// Broker refused it; the entry is gone
	Refused,
	/// Acknowledgment for an entry cycle that no longer exists
	Stale,
}

/// Refcounted filter table.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
	entries: BTreeMap<ArcStr, SubscriptionEntry>,
	next_generation: u64,
	next_observer: u64,
}

impl SubscriptionRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Attaches a new observer to `filter`.
	///
	/// The first observer of a filter creates the entry and issues the only
	/// network subscribe for it; later observers join that entry, keeping the
	/// options and mode chosen by the first one.
	pub fn acquire(
		&mut self,
		filter: ArcStr,
		options: SubscribeOptions,
		mode: DeliveryMode,
		transport: &mut dyn Transport,
	) -> Result<Acquired, SubscriptionError> {
		let observer = ObserverId(self.next_observer);

		if let Some(entry) = self.entries.get_mut(&filter) {
			if entry.options != options || entry.mode != mode {
				debug!(
					filter = %filter,
					requested_qos = ?options.qos,
					requested_mode = ?mode,
					"Joining existing subscription with its original options"
				);
			}
			entry.refcount += 1;
			self.next_observer = self.next_observer.wrapping_add(1);
			debug!(filter = %filter, refcount = entry.refcount, "Observer attached");
			return Ok(Acquired {
				handle: ObserverHandle {
					filter,
					generation: entry.generation,
					observer,
				},
				fresh: false,
				mode: entry.mode,
			});
		}

		let generation = Generation(self.next_generation);
		let entry = SubscriptionEntry {
			filter: filter.clone(),
			options,
			refcount: 1,
			acknowledged: false,
			failed: false,
			generation,
			mode,
		};
		if let Err(err) = transport.subscribe(entry.request()) {
			error!(filter = %filter, error = %err, "Failed to subscribe to MQTT filter");
			return Err(SubscriptionError::SubscribeFailed {
				filter,
				source: err,
			});
		}
		self.next_generation = self.next_generation.wrapping_add(1);
		self.next_observer = self.next_observer.wrapping_add(1);
		info!(filter = %filter, qos = ?options.qos, generation = %generation, "Subscribed");
		self.entries.insert(filter.clone(), entry);

		Ok(Acquired {
			handle: ObserverHandle {
				filter,
				generation,
				observer,
			},
			fresh: true,
			mode,
		})
	}

	/// Detaches the observer behind `handle`.
	///
	/// Dropping the refcount to zero removes the entry and issues the network
	/// unsubscribe before returning. Without a transport the entry is still
	/// removed, only the unsubscribe is skipped.
	pub fn release(
		&mut self,
		handle: &ObserverHandle,
		transport: Option<&mut dyn Transport>,
	) -> Released {
		let Some(entry) = self.entries.get_mut(&handle.filter) else {
			debug!(handle = %handle, "Release for a subscription that no longer exists");
			return Released::Stale;
		};
		if entry.generation != handle.generation {
			debug!(
				handle = %handle,
				live_generation = %entry.generation,
				"Release for an earlier subscription cycle ignored"
			);
			return Released::Stale;
		}

		entry.refcount = entry.refcount.saturating_sub(1);
		if entry.refcount > 0 {
			debug!(filter = %handle.filter, refcount = entry.refcount, "Observer detached");
			return Released::Detached {
				remaining: entry.refcount,
			};
		}

		self.entries.remove(&handle.filter);
		match transport {
			| Some(transport) => Self::unsubscribe(transport, &handle.filter),
			| None => {
				warn!(filter = %handle.filter, "No transport, skipping network unsubscribe");
			}
		}
		info!(filter = %handle.filter, "Last observer released, unsubscribed");
		Released::Removed
	}

	/// Applies the broker's verdict for one filter.
	///
	/// A refusal removes the entry and issues an unsubscribe; the caller is
	/// responsible for failing the entry's observers.
	pub fn acknowledge(
		&mut self,
		filter: &ArcStr,
		generation: Generation,
		grant: SubscribeGrant,
		transport: &mut dyn Transport,
	) -> AckOutcome {
		let Some(entry) = self.entries.get_mut(filter) else {
			debug!(filter = %filter, generation = %generation, "SUBACK for unknown subscription");
			return AckOutcome::Stale;
		};
		if entry.generation != generation {
			debug!(
				filter = %filter,
				generation = %generation,
				live_generation = %entry.generation,
				"SUBACK for an earlier subscription cycle ignored"
			);
			return AckOutcome::Stale;
		}

		match grant {
			| SubscribeGrant::Granted(qos) => {
				entry.acknowledged = true;
				debug!(filter = %filter, granted_qos = ?qos, "Subscription acknowledged");
				AckOutcome::Granted
			}
			| SubscribeGrant::Refused => {
				entry.failed = true;
				warn!(
					filter = %filter,
					refcount = entry.refcount,
					"Broker refused subscription"
				);
				self.entries.remove(filter);
				Self::unsubscribe(transport, filter);
				AckOutcome::Refused
			}
		}
	}

	/// Re-issues a subscribe for every entry with its original options.
	///
	/// Returns the number of subscribe requests accepted by the transport.
	pub fn resubscribe_all(&self, transport: &mut dyn Transport) -> usize {
		let mut issued = 0;
		for entry in self.entries.values() {
			match transport.subscribe(entry.request()) {
				| Ok(()) => issued += 1,
				| Err(err) => {
					error!(
						filter = %entry.filter,
						error = %err,
						"Failed to resubscribe to MQTT filter"
					);
				}
			}
		}
		info!(issued, total = self.entries.len(), "Resubscribed all filters");
		issued
	}

	/// Removes every entry, unsubscribing when a transport is given.
	///
	/// Returns the removed filters.
	pub fn clear(
		&mut self,
		mut transport: Option<&mut dyn Transport>,
	) -> Vec<ArcStr> {
		let entries = std::mem::take(&mut self.entries);
		let mut removed = Vec::with_capacity(entries.len());
		for filter in entries.into_keys() {
			if let Some(transport) = transport.as_mut() {
				Self::unsubscribe(&mut **transport, &filter);
			}
			removed.push(filter);
		}
		removed
	}

	/// Entry for `filter`, if live.
	pub fn get(&self, filter: &str) -> Option<&SubscriptionEntry> {
		self.entries.get(filter)
	}

	/// `true` if `filter` has a live entry.
	pub fn contains(&self, filter: &str) -> bool {
		self.entries.contains_key(filter)
	}

	/// Number of live entries.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// `true` if there are no live entries.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Live filters in ascending order.
	pub fn filters(&self) -> impl Iterator<Item = &ArcStr> {
		self.entries.keys()
	}

	/// Read-only view of all live entries.
	pub fn snapshot(&self) -> Vec<SubscriptionInfo> {
		self.entries
			.values()
			.map(|entry| SubscriptionInfo {
				filter: entry.filter.clone(),
				qos: entry.options.qos,
				refcount: entry.refcount,
				acknowledged: entry.acknowledged,
				replay: entry.mode == DeliveryMode::Replay,
			})
			.collect()
	}

	fn unsubscribe(transport: &mut dyn Transport, filter: &ArcStr) {
		if let Err(err) = transport.unsubscribe(filter) {
			error!(
				filter = %filter,
				error = %err,
				"Failed to unsubscribe from MQTT filter"
			);
		}
	}
}
