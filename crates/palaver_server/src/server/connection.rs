#![forbid(unsafe_code)]

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use palaver_domain::UserId;
use palaver_protocol::{ClientFrame, ServerFrame, decode_client_frame_with_limit};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::server::presence::PresenceRegistry;
use crate::server::registry::ConnectionRegistry;
use crate::server::router::MessageRouter;
use crate::server::store::ChatStore;
use crate::util::time::unix_ms_now;

/// Per-connection server settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	/// Maximum inbound frame payload size in bytes.
	pub max_frame_bytes: usize,

	/// Maximum number of queued outbound frames per connection.
	pub outbound_queue_capacity: usize,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			max_frame_bytes: palaver_protocol::DEFAULT_MAX_FRAME_BYTES,
			outbound_queue_capacity: 1024,
		}
	}
}

/// Why the per-connection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
	/// Peer closed the socket or the stream ended.
	PeerClosed,
	/// A newer connection for the same user replaced this one.
	Superseded,
	/// Transport-level read error.
	TransportError,
}

/// Drive one live connection from Open to Closed.
///
/// The handshake (path user id) has already been validated by the upgrade
/// handler; this task owns the rest of the lifecycle: registration and
/// supersession, the `initial_data` snapshot, presence broadcasts, frame
/// dispatch, and the Closed-state cleanup.
pub async fn handle_connection(
	conn_id: u64,
	user_id: UserId,
	socket: WebSocket,
	store: Arc<ChatStore>,
	presence: PresenceRegistry,
	registry: Arc<ConnectionRegistry>,
	router: Arc<MessageRouter>,
	settings: ConnectionSettings,
) -> anyhow::Result<()> {
	struct ConnectionGaugeGuard;
	impl Drop for ConnectionGaugeGuard {
		fn drop(&mut self) {
			metrics::gauge!("palaver_server_active_connections").decrement(1.0);
		}
	}

	metrics::gauge!("palaver_server_active_connections").increment(1.0);
	let _conn_guard = ConnectionGaugeGuard;

	let (mut ws_tx, mut ws_rx) = socket.split();
	let (frames_tx, mut frames_rx) = mpsc::channel::<ServerFrame>(settings.outbound_queue_capacity);

	// All outbound traffic for this connection funnels through one queue, so
	// per-recipient delivery order equals enqueue order.
	let writer_task = tokio::spawn(async move {
		while let Some(frame) = frames_rx.recv().await {
			let tag = frame.tag();
			let text = match palaver_protocol::encode_server_frame(&frame) {
				Ok(text) => text,
				Err(e) => {
					warn!(conn_id, frame = tag, error = %e, "failed to encode outbound frame");
					continue;
				}
			};

			metrics::counter!("palaver_server_frames_out_total").increment(1);

			if let Err(e) = ws_tx.send(WsMessage::Text(text.into())).await {
				debug!(conn_id, frame = tag, error = %e, "events write failed; peer likely gone");
				break;
			}
		}

		let _ = ws_tx.close().await;
	});

	let (supersede_guard, mut superseded) = oneshot::channel::<()>();
	let had_prior = registry
		.register(user_id.clone(), conn_id, frames_tx.clone(), supersede_guard)
		.await;

	let profile = store.get_or_create_profile(&user_id).await;
	presence.mark_online(profile.clone()).await;

	if had_prior {
		// Invisible handoff: the prior connection is being replaced, so the
		// user never went offline and no duplicate online event is emitted.
		info!(conn_id, user = %user_id, "superseding existing connection");
	} else {
		registry
			.broadcast(&ServerFrame::UserOnline { user: profile.clone() }, Some(&user_id))
			.await;
		registry
			.broadcast(
				&ServerFrame::OnlineUsersUpdate {
					online_users: presence.snapshot().await,
				},
				Some(&user_id),
			)
			.await;
		metrics::counter!("palaver_server_presence_broadcasts_total").increment(1);
	}

	// Resynchronization snapshot: chats with full history plus who is online.
	// Sent on every Open transition, superseding connections included.
	let initial = ServerFrame::InitialData {
		chats: store.chats_for(&user_id).await,
		online_users: presence.snapshot().await,
	};
	if frames_tx.send(initial).await.is_err() {
		debug!(conn_id, user = %user_id, "writer gone before initial_data");
	}

	let close_reason = loop {
		tokio::select! {
			_ = &mut superseded => break CloseReason::Superseded,

			incoming = ws_rx.next() => match incoming {
				None => break CloseReason::PeerClosed,
				Some(Err(e)) => {
					debug!(conn_id, user = %user_id, error = %e, "socket read failed");
					break CloseReason::TransportError;
				}
				Some(Ok(WsMessage::Text(text))) => {
					dispatch_frame(conn_id, &user_id, text.as_str(), &store, &router, &frames_tx, &settings).await;
				}
				Some(Ok(WsMessage::Binary(_))) => {
					// One frame = one complete JSON text object; binary is
					// outside the protocol.
					metrics::counter!("palaver_server_frame_decode_errors_total").increment(1);
					let _ = frames_tx
						.send(ServerFrame::ProtocolError {
							reason: palaver_protocol::ErrorReason::InvalidPayload,
						})
						.await;
				}
				Some(Ok(WsMessage::Close(_))) => break CloseReason::PeerClosed,
				Some(Ok(_)) => {} // Ping/Pong are handled by the transport.
			},
		}
	};

	// Only the current holder of the registry slot emits offline events; a
	// superseded task finds its successor registered and stays silent.
	let was_current = registry.deregister_if_current(&user_id, conn_id).await;
	if was_current {
		presence.mark_offline(&user_id).await;
		registry
			.broadcast(
				&ServerFrame::UserOffline {
					user_id: user_id.clone(),
				},
				None,
			)
			.await;
		registry
			.broadcast(
				&ServerFrame::OnlineUsersUpdate {
					online_users: presence.snapshot().await,
				},
				None,
			)
			.await;
		metrics::counter!("palaver_server_presence_broadcasts_total").increment(1);
	}

	info!(
		conn_id,
		user = %user_id,
		reason = ?close_reason,
		emitted_offline = was_current,
		"connection closed"
	);

	// Dropping our sender lets the writer drain queued frames and exit.
	drop(frames_tx);
	let _ = writer_task.await;

	Ok(())
}

/// Handle one decoded-or-rejected inbound frame.
///
/// Every failure is recovered locally: the sender gets a `protocol_error`
/// with a machine-readable reason and the connection stays Open.
async fn dispatch_frame(
	conn_id: u64,
	user_id: &UserId,
	text: &str,
	store: &ChatStore,
	router: &MessageRouter,
	frames_tx: &mpsc::Sender<ServerFrame>,
	settings: &ConnectionSettings,
) {
	metrics::counter!("palaver_server_frames_in_total").increment(1);

	let frame = match decode_client_frame_with_limit(text, settings.max_frame_bytes) {
		Ok(frame) => frame,
		Err(e) => {
			metrics::counter!("palaver_server_frame_decode_errors_total").increment(1);
			debug!(conn_id, user = %user_id, error = %e, "discarding malformed frame");
			let _ = frames_tx.send(ServerFrame::ProtocolError { reason: e.reason() }).await;
			return;
		}
	};

	match frame {
		ClientFrame::SendMessage { chat_id, text } => {
			match store.append_message(&chat_id, user_id, &text, unix_ms_now()).await {
				Ok(message) => {
					let report = router.deliver(&chat_id, &message).await;
					debug!(
						conn_id,
						user = %user_id,
						chat = %chat_id,
						id = %message.id,
						delivered = report.delivered,
						offline = report.offline,
						"routed new message"
					);
				}
				Err(e) => {
					metrics::counter!("palaver_server_send_rejections_total").increment(1);
					debug!(conn_id, user = %user_id, chat = %chat_id, error = %e, "rejecting send_message");
					let _ = frames_tx.send(ServerFrame::ProtocolError { reason: e.reason() }).await;
				}
			}
		}
	}
}
