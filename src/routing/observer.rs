//! Consumer side of a shared subscription.

use std::pin::Pin;
use std::task::{Context, Poll};

use arcstr::ArcStr;
use futures::Stream;
use tokio::sync::mpsc::error::{SendError, TryRecvError};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use super::registry::ObserverHandle;
use super::router::Delivery;

/// One logical consumer of a shared subscription.
///
/// Yields messages matching the filter in arrival order. A broker refusal is
/// delivered once as `Err` and ends the stream. Call
/// [`release`](Self::release) when done; dropping the observer releases it
/// as well.
#[derive(Debug)]
pub struct Observer {
	receiver: UnboundedReceiver<Delivery>,
	release_tx: Option<UnboundedSender<ObserverHandle>>,
	handle: ObserverHandle,
}

impl Observer {
	pub(crate) fn new(
		receiver: UnboundedReceiver<Delivery>,
		release_tx: UnboundedSender<ObserverHandle>,
		handle: ObserverHandle,
	) -> Self {
		Self {
			receiver,
			release_tx: Some(release_tx),
			handle,
		}
	}

	/// Filter this observer is attached to.
	pub fn filter(&self) -> &ArcStr {
		self.handle.filter()
	}

	/// Handle identifying this observer inside the registry.
	pub fn handle(&self) -> &ObserverHandle {
		&self.handle
	}

	/// Receives the next delivery.
	///
	/// Returns `None` once the subscription is gone.
	pub async fn recv(&mut self) -> Option<Delivery> {
		self.receiver.recv().await
	}

	/// Receives a delivery if one is already queued.
	pub fn try_recv(&mut self) -> Result<Delivery, TryRecvError> {
		self.receiver.try_recv()
	}

	/// Detaches from the shared subscription.
	///
	/// The last observer of a filter triggers the network unsubscribe.
	pub async fn release(mut self) -> Result<(), SendError<ObserverHandle>> {
		match self.release_tx.take() {
			| Some(release_tx) => release_tx.send(self.handle.clone()),
			| None => {
				warn!(handle = %self.handle, "Observer already released");
				Ok(())
			}
		}
	}
}

impl Stream for Observer {
	type Item = Delivery;

	fn poll_next(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
	) -> Poll<Option<Self::Item>> {
		self.receiver.poll_recv(cx)
	}
}

impl Drop for Observer {
	fn drop(&mut self) {
		if let Some(release_tx) = self.release_tx.take() {
			// fails only once the multiplexer is gone
			if release_tx.send(self.handle.clone()).is_ok() {
				debug!(handle = %self.handle, "Observer released in Drop");
			}
		}
	}
}
