#![forbid(unsafe_code)]

use std::sync::Arc;

use palaver_domain::{ChatId, Message};
use palaver_protocol::ServerFrame;
use tracing::{debug, warn};

use crate::server::registry::{ConnectionRegistry, Enqueue, try_enqueue};
use crate::server::store::ChatStore;

/// Settings for the message router.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
	pub debug_log_deliveries: bool,
}

/// Per-delivery accounting, mostly useful in logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
	pub delivered: usize,
	/// Participants with no live channel; an expected steady state, not an
	/// error. They catch up from `initial_data` on their next connect.
	pub offline: usize,
	pub dropped: usize,
}

/// Fans a newly appended message out to the chat's connected participants.
///
/// Durability is the store's job; the router only enqueues onto live
/// channels and never retries.
#[derive(Debug)]
pub struct MessageRouter {
	store: Arc<ChatStore>,
	registry: Arc<ConnectionRegistry>,
	cfg: RouterConfig,
}

impl MessageRouter {
	pub fn new(store: Arc<ChatStore>, registry: Arc<ConnectionRegistry>, cfg: RouterConfig) -> Self {
		Self {
			store,
			registry,
			cfg,
		}
	}

	/// Enqueue a `new_message` frame for each participant with a live
	/// connection, the sender included when connected.
	///
	/// Per-recipient order equals append order (each recipient has one FIFO
	/// queue); order across distinct recipients is unspecified.
	pub async fn deliver(&self, chat_id: &ChatId, message: &Message) -> DeliveryReport {
		let Some(participants) = self.store.participants_of(chat_id).await else {
			// Chats are never deleted, so this only happens if delivery is
			// invoked with an id that was never provisioned.
			warn!(chat = %chat_id, "deliver called for unknown chat");
			return DeliveryReport::default();
		};

		let mut report = DeliveryReport::default();

		for user in &participants {
			let Some(sender) = self.registry.sender_for(user).await else {
				report.offline += 1;
				metrics::counter!("palaver_server_delivery_skipped_offline_total").increment(1);
				continue;
			};

			let frame = ServerFrame::NewMessage {
				chat_id: chat_id.clone(),
				message: message.clone(),
			};

			match try_enqueue(&sender, frame) {
				Enqueue::Sent => {
					report.delivered += 1;
					metrics::counter!("palaver_server_messages_delivered_total").increment(1);
				}
				Enqueue::Dropped => {
					report.dropped += 1;
					metrics::counter!("palaver_server_delivery_dropped_total").increment(1);
					warn!(user = %user, chat = %chat_id, id = %message.id, "recipient queue full; dropping new_message frame");
				}
				Enqueue::Closed => {
					// Writer already gone; equivalent to being offline.
					report.offline += 1;
					metrics::counter!("palaver_server_delivery_skipped_offline_total").increment(1);
				}
			}
		}

		if self.cfg.debug_log_deliveries {
			debug!(
				chat = %chat_id,
				id = %message.id,
				delivered = report.delivered,
				offline = report.offline,
				dropped = report.dropped,
				"message fan-out complete"
			);
		}

		report
	}
}
