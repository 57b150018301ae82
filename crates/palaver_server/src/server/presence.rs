#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use palaver_domain::{UserId, UserProfile};
use tokio::sync::Mutex;

/// Tracks which user identifiers currently hold a live connection.
///
/// Pure state: mutated only by the connection manager, which also owns the
/// decision of when a transition is broadcast. Both marks are idempotent, so
/// superseding connections can re-mark without side effects.
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
	inner: Arc<Mutex<HashMap<UserId, UserProfile>>>,
}

impl PresenceRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Mark a user online, recording display metadata for snapshots.
	pub async fn mark_online(&self, profile: UserProfile) {
		let mut inner = self.inner.lock().await;
		let newly_online = inner.insert(profile.id.clone(), profile).is_none();
		if newly_online {
			metrics::gauge!("palaver_server_online_users").increment(1.0);
		}
	}

	/// Mark a user offline.
	pub async fn mark_offline(&self, user: &UserId) {
		let mut inner = self.inner.lock().await;
		if inner.remove(user).is_some() {
			metrics::gauge!("palaver_server_online_users").decrement(1.0);
		}
	}

	pub async fn is_online(&self, user: &UserId) -> bool {
		self.inner.lock().await.contains_key(user)
	}

	/// Currently-online users. Set semantics: no duplicates; sorted by id
	/// only so the wire output is stable.
	pub async fn snapshot(&self) -> Vec<UserProfile> {
		let inner = self.inner.lock().await;
		let mut users: Vec<UserProfile> = inner.values().cloned().collect();
		users.sort_by(|a, b| a.id.cmp(&b.id));
		users
	}

	pub async fn online_count(&self) -> usize {
		self.inner.lock().await.len()
	}
}
