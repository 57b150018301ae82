#![forbid(unsafe_code)]

use palaver_domain::{ChatId, ChatKind, MessageId, UserId};

use crate::server::store::{ChatRecord, ChatStore, DataFile, StoreError, demo_data};

fn user(id: &str) -> UserId {
	UserId::new(id).expect("valid UserId")
}

fn chat(id: &str) -> ChatId {
	ChatId::new(id).expect("valid ChatId")
}

fn record(id: &str, name: &str, kind: ChatKind, participants: &[&str]) -> ChatRecord {
	ChatRecord {
		id: chat(id),
		name: name.to_string(),
		kind,
		participants: participants.iter().map(|p| user(p)).collect(),
		messages: Vec::new(),
	}
}

fn two_chat_store() -> ChatStore {
	let data = DataFile {
		users: Vec::new(),
		chats: vec![
			record("chat_1", "Alice", ChatKind::Private, &["alice", "bob"]),
			record("chat_2", "Team Project", ChatKind::Group, &["alice", "bob", "charlie"]),
		],
	};

	ChatStore::from_data(data, None).expect("valid store data")
}

#[tokio::test]
async fn append_then_list_shows_message_last_with_assigned_id_and_time() {
	let store = two_chat_store();

	let msg = store
		.append_message(&chat("chat_1"), &user("alice"), "hello", 100)
		.await
		.expect("append");
	assert_eq!(msg.id, MessageId::FIRST);
	assert_eq!(msg.time, 100);

	let chats = store.chats_for(&user("alice")).await;
	assert_eq!(chats.len(), 2);
	assert_eq!(chats[0].id, chat("chat_1"));
	assert_eq!(chats[0].messages.last(), Some(&msg));

	let second = store
		.append_message(&chat("chat_1"), &user("bob"), "hi back", 101)
		.await
		.expect("append");
	assert!(second.id > msg.id, "each append gets a fresh, larger id");

	let chats = store.chats_for(&user("bob")).await;
	assert_eq!(chats[0].messages.last(), Some(&second));
}

#[tokio::test]
async fn non_member_append_fails_and_leaves_chat_unchanged() {
	let store = two_chat_store();

	let err = store
		.append_message(&chat("chat_1"), &user("charlie"), "let me in", 5)
		.await
		.unwrap_err();
	assert!(matches!(err, StoreError::NotMember { .. }));

	let chats = store.chats_for(&user("alice")).await;
	assert!(chats[0].messages.is_empty(), "rejected append must not mutate the chat");
}

#[tokio::test]
async fn unknown_chat_fails_not_found() {
	let store = two_chat_store();

	let err = store
		.append_message(&chat("chat_9"), &user("alice"), "anyone there?", 5)
		.await
		.unwrap_err();
	assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn whitespace_only_text_fails_invalid_text() {
	let store = two_chat_store();

	for text in ["", "   ", "\n\t "] {
		let err = store
			.append_message(&chat("chat_1"), &user("alice"), text, 5)
			.await
			.unwrap_err();
		assert_eq!(err, StoreError::InvalidText, "text: {text:?}");
	}

	let chats = store.chats_for(&user("alice")).await;
	assert!(chats[0].messages.is_empty());
}

#[tokio::test]
async fn stored_text_is_trimmed() {
	let store = two_chat_store();

	let msg = store
		.append_message(&chat("chat_1"), &user("alice"), "  hello  ", 5)
		.await
		.expect("append");
	assert_eq!(msg.text, "hello");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_same_chat_appends_assign_unique_monotonic_ids() {
	let store = std::sync::Arc::new(two_chat_store());

	let tasks: Vec<_> = (0..16)
		.map(|i| {
			let store = std::sync::Arc::clone(&store);
			tokio::spawn(async move {
				store
					.append_message(&chat("chat_1"), &user("alice"), &format!("msg {i}"), i)
					.await
					.expect("append")
			})
		})
		.collect();

	let mut ids: Vec<u64> = Vec::new();
	for task in tasks {
		ids.push(task.await.expect("join").id.as_u64());
	}
	ids.sort_unstable();
	assert_eq!(ids, (1..=16).collect::<Vec<u64>>(), "no lost updates, no duplicate ids");

	let chats = store.chats_for(&user("alice")).await;
	let stored: Vec<u64> = chats[0].messages.iter().map(|m| m.id.as_u64()).collect();
	assert_eq!(stored, (1..=16).collect::<Vec<u64>>(), "stored order equals id order");
}

#[tokio::test]
async fn id_sequences_are_per_chat() {
	let store = two_chat_store();

	let a = store
		.append_message(&chat("chat_1"), &user("alice"), "one", 1)
		.await
		.expect("append");
	let b = store
		.append_message(&chat("chat_2"), &user("bob"), "two", 2)
		.await
		.expect("append");

	assert_eq!(a.id, MessageId::FIRST);
	assert_eq!(b.id, MessageId::FIRST, "chats do not share a sequence");
}

#[tokio::test]
async fn user_with_no_chats_gets_empty_list() {
	let store = two_chat_store();
	assert!(store.chats_for(&user("zoe")).await.is_empty());
}

#[tokio::test]
async fn get_or_create_profile_materializes_placeholder() {
	let store = two_chat_store();

	let profile = store.get_or_create_profile(&user("dave")).await;
	assert_eq!(profile.name, "dave");
	assert!(profile.avatar.is_none());

	// Second lookup returns the same directory entry.
	assert_eq!(store.get_or_create_profile(&user("dave")).await, profile);
}

#[tokio::test]
async fn snapshot_persists_and_reloads_with_continued_id_sequence() {
	let path = std::env::temp_dir().join(format!("palaver-store-roundtrip-{}.json", std::process::id()));
	let _ = std::fs::remove_file(&path);

	{
		let data = DataFile {
			users: Vec::new(),
			chats: vec![record("chat_1", "Alice", ChatKind::Private, &["alice", "bob"])],
		};
		let store = ChatStore::from_data(data, Some(path.clone())).expect("valid store data");
		store
			.append_message(&chat("chat_1"), &user("alice"), "hello", 100)
			.await
			.expect("append");
	}

	let reloaded = ChatStore::load(&path, false).expect("reload");
	let chats = reloaded.chats_for(&user("bob")).await;
	assert_eq!(chats.len(), 1);
	assert_eq!(chats[0].messages.len(), 1);
	assert_eq!(chats[0].messages[0].text, "hello");
	assert_eq!(chats[0].messages[0].time, 100);

	let next = reloaded
		.append_message(&chat("chat_1"), &user("bob"), "hi", 101)
		.await
		.expect("append");
	assert_eq!(next.id, MessageId(2), "sequence continues after reload");

	let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn missing_data_file_loads_as_empty_store() {
	let path = std::env::temp_dir().join(format!("palaver-store-missing-{}.json", std::process::id()));
	let _ = std::fs::remove_file(&path);

	let store = ChatStore::load(&path, false).expect("load missing file");
	assert!(store.is_empty().await);
}

#[test]
fn provisioning_rejects_invalid_chats() {
	// Private chats require exactly two participants.
	let data = DataFile {
		users: Vec::new(),
		chats: vec![record("c", "c", ChatKind::Private, &["a", "b", "c"])],
	};
	assert!(ChatStore::from_data(data, None).is_err());

	// Participant lists must be unique.
	let data = DataFile {
		users: Vec::new(),
		chats: vec![record("c", "c", ChatKind::Group, &["a", "a"])],
	};
	assert!(ChatStore::from_data(data, None).is_err());

	// A participant set must never be empty.
	let data = DataFile {
		users: Vec::new(),
		chats: vec![record("c", "c", ChatKind::Group, &[])],
	};
	assert!(ChatStore::from_data(data, None).is_err());

	// History senders must be members.
	let mut bad = record("c", "c", ChatKind::Private, &["a", "b"]);
	bad.messages.push(palaver_domain::Message {
		id: MessageId::FIRST,
		sender: user("mallory"),
		text: "hi".to_string(),
		time: 1,
	});
	let data = DataFile {
		users: Vec::new(),
		chats: vec![bad],
	};
	assert!(ChatStore::from_data(data, None).is_err());

	// Duplicate chat ids are a provisioning error.
	let data = DataFile {
		users: Vec::new(),
		chats: vec![
			record("c", "c", ChatKind::Private, &["a", "b"]),
			record("c", "c2", ChatKind::Private, &["a", "b"]),
		],
	};
	assert!(ChatStore::from_data(data, None).is_err());
}

#[tokio::test]
async fn demo_data_is_valid_provisioning_input() {
	let store = ChatStore::from_data(demo_data(42), None).expect("demo data provisions");

	let chats = store.chats_for(&user("alice")).await;
	assert_eq!(chats.len(), 3);

	// Seeded history already used ids 1 and 2; the next append continues.
	let msg = store
		.append_message(&chat("chat_1"), &user("alice"), "anyone?", 43)
		.await
		.expect("append");
	assert_eq!(msg.id, MessageId(3));
}
