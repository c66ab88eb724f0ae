//! Subscription multiplexing module
//!
//! The refcounted subscription registry, the router that fans inbound
//! messages out to observers, and the observer handle itself.

pub mod error;
pub mod observer;
pub mod registry;
pub mod router;

#[cfg(test)]
pub(crate) mod registry_tests;

pub use error::SubscriptionError;
pub use observer::Observer;
pub use registry::{
	AckOutcome, Acquired, DeliveryMode, Generation, ObserverHandle,
	ObserverId, Released, SubscriptionEntry, SubscriptionInfo,
	SubscriptionRegistry,
};
pub use router::{Delivery, MessageRouter};
