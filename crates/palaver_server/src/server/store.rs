#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, anyhow, bail};
use palaver_domain::{ChatId, ChatKind, Message, MessageId, UserId, UserProfile};
use palaver_protocol::{ChatSnapshot, ErrorReason};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Errors surfaced to the sender of a rejected `send_message`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
	#[error("unknown chat: {0}")]
	NotFound(ChatId),

	#[error("{user} is not a participant of chat {chat}")]
	NotMember {
		chat: ChatId,
		user: UserId,
	},

	#[error("message text is empty after trimming")]
	InvalidText,
}

impl StoreError {
	/// Machine-readable reason echoed to the sender in a `protocol_error`.
	pub fn reason(&self) -> ErrorReason {
		match self {
			StoreError::NotFound(_) => ErrorReason::NotFound,
			StoreError::NotMember { .. } => ErrorReason::NotMember,
			StoreError::InvalidText => ErrorReason::InvalidText,
		}
	}
}

/// On-disk store format: provisioned users and chats with message history.
///
/// Chats and participant lists are provisioned out of band; this file is the
/// administrative boundary, not a client-facing surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataFile {
	#[serde(default)]
	pub users: Vec<UserProfile>,

	#[serde(default)]
	pub chats: Vec<ChatRecord>,
}

/// One chat in the data file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
	pub id: ChatId,
	pub name: String,
	pub kind: ChatKind,
	pub participants: Vec<UserId>,

	#[serde(default)]
	pub messages: Vec<Message>,
}

/// Owns the durable set of chats, their participant lists and ordered
/// message history. Pure data layer; no networking.
///
/// Appends to the same chat are serialized by a per-chat lock; appends to
/// different chats proceed concurrently.
#[derive(Debug)]
pub struct ChatStore {
	inner: RwLock<Inner>,
	persist_path: Option<PathBuf>,

	/// Serializes snapshot writes so concurrent appends cannot interleave
	/// partially-written files.
	persist_lock: Mutex<()>,
}

#[derive(Debug, Default)]
struct Inner {
	/// Chat ids in provisioning order; `chats_for` preserves it.
	order: Vec<ChatId>,
	chats: HashMap<ChatId, Arc<ChatEntry>>,
	users: HashMap<UserId, UserProfile>,
}

#[derive(Debug)]
struct ChatEntry {
	id: ChatId,
	name: String,
	kind: ChatKind,
	participants: Vec<UserId>,
	log: Mutex<MessageLog>,
}

#[derive(Debug)]
struct MessageLog {
	next_id: MessageId,
	messages: Vec<Message>,
}

impl Default for ChatStore {
	fn default() -> Self {
		Self::new()
	}
}

impl ChatStore {
	/// Empty in-memory store.
	pub fn new() -> Self {
		Self {
			inner: RwLock::new(Inner::default()),
			persist_path: None,
			persist_lock: Mutex::new(()),
		}
	}

	/// Build a store from provisioning data, validating the chat invariants.
	///
	/// With a `persist_path`, a JSON snapshot is written back after each
	/// append (and profile creation), giving appends synchronous-commit
	/// semantics against that file.
	pub fn from_data(data: DataFile, persist_path: Option<PathBuf>) -> anyhow::Result<Self> {
		let mut inner = Inner::default();

		for profile in data.users {
			inner.users.insert(profile.id.clone(), profile);
		}

		for record in data.chats {
			if inner.chats.contains_key(&record.id) {
				bail!("duplicate chat id in data file: {}", record.id);
			}

			let entry = ChatEntry::from_record(record)?;
			inner.order.push(entry.id.clone());
			inner.chats.insert(entry.id.clone(), Arc::new(entry));
		}

		Ok(Self {
			inner: RwLock::new(inner),
			persist_path,
			persist_lock: Mutex::new(()),
		})
	}

	/// Load a store from a JSON data file; a missing file yields an empty
	/// store. `write_back` enables the post-append snapshot to the same path.
	pub fn load(path: &Path, write_back: bool) -> anyhow::Result<Self> {
		let data = read_data_file(path)
			.with_context(|| format!("read store data from {}", path.display()))?
			.unwrap_or_default();

		Self::from_data(data, write_back.then(|| path.to_path_buf()))
	}

	/// Whether any chats are provisioned.
	pub async fn is_empty(&self) -> bool {
		self.inner.read().await.chats.is_empty()
	}

	/// All chats where `user` is a participant, in provisioning order, with
	/// full message history.
	pub async fn chats_for(&self, user: &UserId) -> Vec<ChatSnapshot> {
		let entries: Vec<Arc<ChatEntry>> = {
			let inner = self.inner.read().await;
			inner
				.order
				.iter()
				.filter_map(|id| inner.chats.get(id))
				.filter(|entry| entry.participants.contains(user))
				.cloned()
				.collect()
		};

		let mut chats = Vec::with_capacity(entries.len());
		for entry in entries {
			let log = entry.log.lock().await;
			chats.push(ChatSnapshot {
				id: entry.id.clone(),
				name: entry.name.clone(),
				kind: entry.kind,
				participants: entry.participants.clone(),
				messages: log.messages.clone(),
			});
		}

		chats
	}

	/// Participant list of a chat, if it exists.
	pub async fn participants_of(&self, chat: &ChatId) -> Option<Vec<UserId>> {
		let inner = self.inner.read().await;
		inner.chats.get(chat).map(|entry| entry.participants.clone())
	}

	/// Append a message to a chat.
	///
	/// The id is the chat's next sequence value and `now` becomes the message
	/// timestamp; both reflect the order in which same-chat appends won the
	/// per-chat lock. The message is visible to readers (and flushed to the
	/// data file, when persistence is on) before the call returns.
	pub async fn append_message(
		&self,
		chat: &ChatId,
		sender: &UserId,
		text: &str,
		now: i64,
	) -> Result<Message, StoreError> {
		let entry = {
			let inner = self.inner.read().await;
			inner
				.chats
				.get(chat)
				.cloned()
				.ok_or_else(|| StoreError::NotFound(chat.clone()))?
		};

		if !entry.participants.contains(sender) {
			return Err(StoreError::NotMember {
				chat: chat.clone(),
				user: sender.clone(),
			});
		}

		let text = text.trim();
		if text.is_empty() {
			return Err(StoreError::InvalidText);
		}

		let message = {
			let mut log = entry.log.lock().await;
			let message = Message {
				id: log.next_id,
				sender: sender.clone(),
				text: text.to_string(),
				time: now,
			};
			log.next_id = log.next_id.next();
			log.messages.push(message.clone());
			message
		};

		metrics::counter!("palaver_server_messages_appended_total").increment(1);
		debug!(chat = %chat, sender = %sender, id = %message.id, "appended message");

		self.persist_if_enabled().await;

		Ok(message)
	}

	/// Directory lookup used for presence metadata; unknown users are
	/// materialized with `name = id` on first reference.
	pub async fn get_or_create_profile(&self, user: &UserId) -> UserProfile {
		{
			let inner = self.inner.read().await;
			if let Some(profile) = inner.users.get(user) {
				return profile.clone();
			}
		}

		let created = {
			let mut inner = self.inner.write().await;
			inner
				.users
				.entry(user.clone())
				.or_insert_with(|| UserProfile::placeholder(user.clone()))
				.clone()
		};

		self.persist_if_enabled().await;

		created
	}

	/// Serialize the full store back into `DataFile` form.
	pub async fn snapshot_data(&self) -> DataFile {
		let inner = self.inner.read().await;

		let mut chats = Vec::with_capacity(inner.order.len());
		for id in &inner.order {
			let Some(entry) = inner.chats.get(id) else { continue };
			let log = entry.log.lock().await;
			chats.push(ChatRecord {
				id: entry.id.clone(),
				name: entry.name.clone(),
				kind: entry.kind,
				participants: entry.participants.clone(),
				messages: log.messages.clone(),
			});
		}

		let mut users: Vec<UserProfile> = inner.users.values().cloned().collect();
		users.sort_by(|a, b| a.id.cmp(&b.id));

		DataFile { users, chats }
	}

	async fn persist_if_enabled(&self) {
		let Some(path) = self.persist_path.as_deref() else {
			return;
		};

		let _guard = self.persist_lock.lock().await;
		let data = self.snapshot_data().await;
		if let Err(e) = write_data_file(path, &data) {
			metrics::counter!("palaver_server_store_persist_failures_total").increment(1);
			warn!(error = %e, path = %path.display(), "failed to write store snapshot");
		}
	}
}

impl ChatEntry {
	fn from_record(record: ChatRecord) -> anyhow::Result<Self> {
		let ChatRecord {
			id,
			name,
			kind,
			participants,
			messages,
		} = record;

		let unique: HashSet<&UserId> = participants.iter().collect();
		if unique.len() != participants.len() {
			bail!("chat {id}: duplicate participants");
		}

		match kind {
			ChatKind::Private if participants.len() != 2 => {
				bail!("chat {id}: private chats require exactly 2 participants, got {}", participants.len());
			}
			ChatKind::Group if participants.len() < 2 => {
				bail!("chat {id}: group chats require at least 2 participants, got {}", participants.len());
			}
			_ => {}
		}

		let mut last_id: Option<MessageId> = None;
		for message in &messages {
			if !participants.contains(&message.sender) {
				bail!("chat {id}: message {} sent by non-participant {}", message.id, message.sender);
			}
			if message.id < MessageId::FIRST || last_id.is_some_and(|prev| message.id <= prev) {
				bail!("chat {id}: message ids must be ascending, starting at 1");
			}
			last_id = Some(message.id);
		}

		let next_id = last_id.map(MessageId::next).unwrap_or(MessageId::FIRST);

		Ok(Self {
			id,
			name,
			kind,
			participants,
			log: Mutex::new(MessageLog {
				next_id,
				messages,
			}),
		})
	}
}

/// Read a `DataFile` from disk; a missing file is `None`, not an error.
pub fn read_data_file(path: &Path) -> anyhow::Result<Option<DataFile>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let data: DataFile = serde_json::from_str(&s).context("parse store JSON")?;
			Ok(Some(data))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read store data file")),
	}
}

fn write_data_file(path: &Path, data: &DataFile) -> anyhow::Result<()> {
	let json = serde_json::to_string_pretty(data).context("serialize store snapshot")?;

	// Write-then-rename so readers never observe a partial snapshot.
	let tmp = path.with_extension("json.tmp");
	fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
	fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
	Ok(())
}

/// Dev-only demo data set mirroring the historical defaults.
pub fn demo_data(now: i64) -> DataFile {
	fn user(id: &str, name: &str, avatar_seed: u32) -> UserProfile {
		UserProfile {
			id: UserId::new(id).expect("valid demo user id"),
			name: name.to_string(),
			avatar: Some(format!("https://i.pravatar.cc/150?img={avatar_seed}")),
		}
	}

	fn message(id: u64, sender: &str, text: &str, time: i64) -> Message {
		Message {
			id: MessageId(id),
			sender: UserId::new(sender).expect("valid demo user id"),
			text: text.to_string(),
			time,
		}
	}

	fn participants(ids: &[&str]) -> Vec<UserId> {
		ids.iter().map(|id| UserId::new(*id).expect("valid demo user id")).collect()
	}

	DataFile {
		users: vec![
			user("alice", "Alice", 1),
			user("bob", "Bob", 2),
			user("charlie", "Charlie", 3),
			user("diana", "Diana", 4),
		],
		chats: vec![
			ChatRecord {
				id: ChatId::new("chat_1").expect("valid demo chat id"),
				name: "Alice".to_string(),
				kind: ChatKind::Private,
				participants: participants(&["alice", "bob"]),
				messages: vec![
					message(1, "alice", "Hey there!", now),
					message(2, "bob", "How are you?", now),
				],
			},
			ChatRecord {
				id: ChatId::new("chat_2").expect("valid demo chat id"),
				name: "Team Project".to_string(),
				kind: ChatKind::Group,
				participants: participants(&["alice", "bob", "charlie", "diana"]),
				messages: vec![
					message(1, "alice", "Let's start the call!", now),
					message(2, "charlie", "Joining in 5 mins", now),
				],
			},
			ChatRecord {
				id: ChatId::new("chat_3").expect("valid demo chat id"),
				name: "Bob".to_string(),
				kind: ChatKind::Private,
				participants: participants(&["alice", "bob"]),
				messages: vec![message(1, "bob", "Meeting at 3?", now)],
			},
		],
	}
}
