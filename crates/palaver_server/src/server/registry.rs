#![forbid(unsafe_code)]

use std::collections::HashMap;

use palaver_domain::UserId;
use palaver_protocol::ServerFrame;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::warn;

/// Outcome of a non-blocking enqueue onto a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
	Sent,
	/// Queue full: the frame is dropped rather than blocking the caller.
	Dropped,
	/// The connection's writer is gone; treat the channel as unavailable.
	Closed,
}

/// Enqueue a frame without suspending. FIFO per receiver is preserved by the
/// underlying channel, so per-recipient delivery order equals enqueue order.
pub fn try_enqueue(sender: &mpsc::Sender<ServerFrame>, frame: ServerFrame) -> Enqueue {
	match sender.try_send(frame) {
		Ok(()) => Enqueue::Sent,
		Err(mpsc::error::TrySendError::Full(_)) => Enqueue::Dropped,
		Err(mpsc::error::TrySendError::Closed(_)) => Enqueue::Closed,
	}
}

#[derive(Debug)]
struct ConnHandle {
	conn_id: u64,
	frames: mpsc::Sender<ServerFrame>,

	/// Dropped when this handle is replaced or removed; the owning
	/// connection task observes the drop as its supersession signal.
	_supersede_guard: oneshot::Sender<()>,
}

/// The set of live per-user channels: at most one per user identifier.
///
/// Mutation happens only from connection tasks; lookup for fan-out takes the
/// read half so unrelated connects/disconnects are not blocked.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
	inner: RwLock<HashMap<UserId, ConnHandle>>,
}

impl ConnectionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a connection for `user`, superseding any prior one.
	///
	/// Returns whether a prior connection existed. Replacing the prior handle
	/// drops its supersession guard, which wakes the old task; the handoff is
	/// atomic under the write lock, so no offline window is observable.
	pub async fn register(
		&self,
		user: UserId,
		conn_id: u64,
		frames: mpsc::Sender<ServerFrame>,
		supersede_guard: oneshot::Sender<()>,
	) -> bool {
		let mut inner = self.inner.write().await;
		inner
			.insert(
				user,
				ConnHandle {
					conn_id,
					frames,
					_supersede_guard: supersede_guard,
				},
			)
			.is_some()
	}

	/// Remove `user`'s handle only if it still belongs to `conn_id`.
	///
	/// Returns whether the handle was removed; a superseded task gets `false`
	/// and must not emit offline events for its successor.
	pub async fn deregister_if_current(&self, user: &UserId, conn_id: u64) -> bool {
		let mut inner = self.inner.write().await;
		match inner.get(user) {
			Some(handle) if handle.conn_id == conn_id => {
				inner.remove(user);
				true
			}
			_ => false,
		}
	}

	/// The outbound queue for `user`, if a connection is live.
	pub async fn sender_for(&self, user: &UserId) -> Option<mpsc::Sender<ServerFrame>> {
		let inner = self.inner.read().await;
		inner.get(user).map(|handle| handle.frames.clone())
	}

	pub async fn is_connected(&self, user: &UserId) -> bool {
		self.inner.read().await.contains_key(user)
	}

	pub async fn connection_count(&self) -> usize {
		self.inner.read().await.len()
	}

	/// Enqueue a frame for every live connection except `exclude`.
	///
	/// Returns how many connections accepted the frame.
	pub async fn broadcast(&self, frame: &ServerFrame, exclude: Option<&UserId>) -> usize {
		let inner = self.inner.read().await;
		let mut sent = 0;

		for (user, handle) in inner.iter() {
			if exclude == Some(user) {
				continue;
			}

			match try_enqueue(&handle.frames, frame.clone()) {
				Enqueue::Sent => sent += 1,
				Enqueue::Dropped => {
					metrics::counter!("palaver_server_broadcast_dropped_total").increment(1);
					warn!(user = %user, frame = frame.tag(), "broadcast dropped; recipient queue full");
				}
				Enqueue::Closed => {}
			}
		}

		sent
	}
}
