use palaver_domain::{ChatId, ChatKind, Message, MessageId, UserId, UserProfile};
use palaver_protocol::{
	ChatSnapshot, ClientFrame, CodecError, ErrorReason, ServerFrame, decode_client_frame,
	decode_client_frame_with_limit, encode_server_frame,
};
use proptest::prelude::*;

fn user(id: &str) -> UserId {
	UserId::new(id).expect("valid UserId")
}

#[test]
fn send_message_roundtrip_through_client_encoding() {
	let frame = ClientFrame::SendMessage {
		chat_id: ChatId::new("chat_1").unwrap(),
		text: "hello there".to_string(),
	};

	let encoded = serde_json::to_string(&frame).expect("encode");
	let decoded = decode_client_frame(&encoded).expect("decode");
	assert_eq!(decoded, frame);
}

#[test]
fn initial_data_carries_chats_and_presence() {
	let frame = ServerFrame::InitialData {
		chats: vec![ChatSnapshot {
			id: ChatId::new("chat_1").unwrap(),
			name: "Alice".to_string(),
			kind: ChatKind::Private,
			participants: vec![user("alice"), user("bob")],
			messages: vec![Message {
				id: MessageId::FIRST,
				sender: user("alice"),
				text: "Hey there!".to_string(),
				time: 1_700_000_000_000,
			}],
		}],
		online_users: vec![UserProfile {
			id: user("alice"),
			name: "Alice".to_string(),
			avatar: None,
		}],
	};

	let encoded = encode_server_frame(&frame).expect("encode");
	let value: serde_json::Value = serde_json::from_str(&encoded).expect("json");

	assert_eq!(value["type"], "initial_data");
	assert_eq!(value["chats"][0]["id"], "chat_1");
	assert_eq!(value["chats"][0]["kind"], "private");
	assert_eq!(value["chats"][0]["participants"], serde_json::json!(["alice", "bob"]));
	assert_eq!(value["chats"][0]["messages"][0]["id"], 1);
	assert_eq!(value["online_users"][0]["id"], "alice");

	// An absent avatar is omitted from the wire, not serialized as null.
	assert!(value["online_users"][0].get("avatar").is_none());
}

#[test]
fn empty_chat_list_is_a_valid_state() {
	let encoded = encode_server_frame(&ServerFrame::InitialData {
		chats: Vec::new(),
		online_users: Vec::new(),
	})
	.expect("encode");
	assert_eq!(encoded, r#"{"type":"initial_data","chats":[],"online_users":[]}"#);
}

#[test]
fn unknown_tags_from_observed_vocabulary_are_rejected() {
	// Server-only tags are not valid inbound frames.
	for tag in ["initial_data", "new_message", "user_online", "user_offline", "ping"] {
		let text = format!(r#"{{"type":"{tag}"}}"#);
		let err = decode_client_frame(&text).unwrap_err();
		assert_eq!(err.reason(), ErrorReason::UnknownType, "tag: {tag}");
	}
}

#[test]
fn tag_matching_is_case_sensitive() {
	let err = decode_client_frame(r#"{"type":"Send_Message","chat_id":"c","text":"hi"}"#).unwrap_err();
	assert_eq!(err.reason(), ErrorReason::UnknownType);
}

#[test]
fn empty_chat_id_is_invalid_payload() {
	let err = decode_client_frame(r#"{"type":"send_message","chat_id":"  ","text":"hi"}"#).unwrap_err();
	assert_eq!(err.reason(), ErrorReason::InvalidPayload);
}

proptest! {
	#[test]
	fn decode_never_panics_on_arbitrary_input(text in ".{0,256}") {
		let _ = decode_client_frame(&text);
	}

	#[test]
	fn decode_never_panics_on_arbitrary_json_objects(
		tag in "[a-z_]{0,24}",
		key in "[a-z_]{1,16}",
		val in "[ -~]{0,64}",
	) {
		let text = serde_json::json!({ "type": tag, key: val }).to_string();
		let result = decode_client_frame(&text);
		if let Err(err) = result {
			// Every failure maps to one of the two codec reasons.
			prop_assert!(matches!(err.reason(), ErrorReason::UnknownType | ErrorReason::InvalidPayload));
		}
	}

	#[test]
	fn send_message_roundtrip_for_arbitrary_text(text in "[ -~]{1,128}") {
		let frame = ClientFrame::SendMessage {
			chat_id: ChatId::new("chat_1").unwrap(),
			text: text.clone(),
		};
		let encoded = serde_json::to_string(&frame).expect("encode");
		let decoded = decode_client_frame(&encoded).expect("decode");
		prop_assert_eq!(decoded, frame);
	}

	#[test]
	fn limit_is_enforced_for_any_oversized_frame(extra in 1usize..512) {
		let text = format!(r#"{{"type":"send_message","chat_id":"c","text":"{}"}}"#, "x".repeat(extra));
		let limit = text.len() - 1;
		let err = decode_client_frame_with_limit(&text, limit).unwrap_err();
		let is_frame_too_large = matches!(err, CodecError::FrameTooLarge { .. });
		prop_assert!(is_frame_too_large);
	}
}
