#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use palaver_domain::UserId;
use tracing::{info, warn};

use crate::server::connection::{ConnectionSettings, handle_connection};
use crate::server::presence::PresenceRegistry;
use crate::server::registry::ConnectionRegistry;
use crate::server::router::{MessageRouter, RouterConfig};
use crate::server::store::ChatStore;

/// Shared handles passed to every request handler.
#[derive(Clone)]
pub struct AppState {
	pub store: Arc<ChatStore>,
	pub presence: PresenceRegistry,
	pub registry: Arc<ConnectionRegistry>,
	pub router: Arc<MessageRouter>,
	pub settings: ConnectionSettings,
	next_conn_id: Arc<AtomicU64>,
}

impl AppState {
	/// Wire the delivery core around a provisioned store.
	pub fn new(store: Arc<ChatStore>, settings: ConnectionSettings) -> Self {
		let registry = Arc::new(ConnectionRegistry::new());
		let router = Arc::new(MessageRouter::new(
			Arc::clone(&store),
			Arc::clone(&registry),
			RouterConfig::default(),
		));

		Self {
			store,
			presence: PresenceRegistry::new(),
			registry,
			router,
			settings,
			next_conn_id: Arc::new(AtomicU64::new(1)),
		}
	}

	fn next_conn_id(&self) -> u64 {
		self.next_conn_id.fetch_add(1, Ordering::Relaxed)
	}
}

/// The client-facing router: the WebSocket endpoint plus a root banner.
pub fn build_router(state: AppState) -> Router {
	Router::new()
		.route("/", get(root))
		.route("/ws/{user_id}", get(ws_handler))
		.with_state(state)
}

async fn root() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "message": "palaver delivery core running" }))
}

/// Handshake: the path-embedded user id is validated before the upgrade;
/// authentication of that id is the fronting layer's concern, not ours.
async fn ws_handler(Path(user_id): Path<String>, State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
	let user_id = match UserId::new(user_id) {
		Ok(id) => id,
		Err(e) => {
			metrics::counter!("palaver_server_handshake_rejects_total").increment(1);
			warn!(error = %e, "rejecting handshake with invalid user id");
			return (StatusCode::BAD_REQUEST, "user id must be non-empty").into_response();
		}
	};

	let conn_id = state.next_conn_id();
	metrics::counter!("palaver_server_connections_total").increment(1);

	ws.on_upgrade(move |socket| async move {
		info!(conn_id, user = %user_id, "accepted connection");

		if let Err(e) = handle_connection(
			conn_id,
			user_id,
			socket,
			Arc::clone(&state.store),
			state.presence.clone(),
			Arc::clone(&state.registry),
			Arc::clone(&state.router),
			state.settings.clone(),
		)
		.await
		{
			warn!(conn_id, error = %e, "connection handler exited with error");
		}
	})
}
