#![forbid(unsafe_code)]

use palaver_domain::{ChatId, ChatKind, Message, UserId, UserProfile};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum inbound frame payload size for v1.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024; // 64 KiB

#[derive(Debug, Error)]
pub enum CodecError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("unrecognized frame type: {tag}")]
	UnknownType {
		tag: String,
	},

	#[error("invalid frame payload: {0}")]
	InvalidPayload(String),

	#[error("json encode error: {0}")]
	Encode(String),
}

impl CodecError {
	/// Machine-readable reason echoed to the sender in a `protocol_error`.
	pub fn reason(&self) -> ErrorReason {
		match self {
			CodecError::UnknownType { .. } => ErrorReason::UnknownType,
			_ => ErrorReason::InvalidPayload,
		}
	}
}

/// Machine-readable reason strings carried by `protocol_error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
	UnknownType,
	InvalidPayload,
	NotMember,
	NotFound,
	InvalidText,
}

impl ErrorReason {
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorReason::UnknownType => "unknown_type",
			ErrorReason::InvalidPayload => "invalid_payload",
			ErrorReason::NotMember => "not_member",
			ErrorReason::NotFound => "not_found",
			ErrorReason::InvalidText => "invalid_text",
		}
	}
}

impl core::fmt::Display for ErrorReason {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One chat as serialized into `initial_data`: metadata plus full history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSnapshot {
	pub id: ChatId,
	pub name: String,
	pub kind: ChatKind,
	pub participants: Vec<UserId>,
	pub messages: Vec<Message>,
}

/// Frames a client may send, one variant per `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
	SendMessage {
		chat_id: ChatId,
		text: String,
	},
}

/// Tags this server recognizes on inbound frames.
const CLIENT_TAGS: &[&str] = &["send_message"];

/// Frames the server produces, one variant per `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
	InitialData {
		chats: Vec<ChatSnapshot>,
		online_users: Vec<UserProfile>,
	},
	NewMessage {
		chat_id: ChatId,
		message: Message,
	},
	UserOnline {
		user: UserProfile,
	},
	UserOffline {
		user_id: UserId,
	},
	OnlineUsersUpdate {
		online_users: Vec<UserProfile>,
	},
	ProtocolError {
		reason: ErrorReason,
	},
}

impl ServerFrame {
	/// Tag string for logs/metrics.
	pub const fn tag(&self) -> &'static str {
		match self {
			ServerFrame::InitialData { .. } => "initial_data",
			ServerFrame::NewMessage { .. } => "new_message",
			ServerFrame::UserOnline { .. } => "user_online",
			ServerFrame::UserOffline { .. } => "user_offline",
			ServerFrame::OnlineUsersUpdate { .. } => "online_users_update",
			ServerFrame::ProtocolError { .. } => "protocol_error",
		}
	}
}

/// Decode one inbound text frame using `DEFAULT_MAX_FRAME_BYTES`.
pub fn decode_client_frame(text: &str) -> Result<ClientFrame, CodecError> {
	decode_client_frame_with_limit(text, DEFAULT_MAX_FRAME_BYTES)
}

/// Decode one inbound text frame.
///
/// Validation happens in two steps so the caller can echo the right reason:
/// the frame must be a JSON object carrying a recognized `type` string
/// (`unknown_type` otherwise), and the payload fields must match that type's
/// shape (`invalid_payload` otherwise).
pub fn decode_client_frame_with_limit(text: &str, max_frame_bytes: usize) -> Result<ClientFrame, CodecError> {
	if text.len() > max_frame_bytes {
		return Err(CodecError::FrameTooLarge {
			len: text.len(),
			max: max_frame_bytes,
		});
	}

	let value: serde_json::Value =
		serde_json::from_str(text).map_err(|e| CodecError::InvalidPayload(e.to_string()))?;

	let Some(obj) = value.as_object() else {
		return Err(CodecError::InvalidPayload("frame must be a JSON object".to_string()));
	};

	let Some(tag) = obj.get("type").and_then(|t| t.as_str()) else {
		return Err(CodecError::InvalidPayload("missing \"type\" string field".to_string()));
	};

	if !CLIENT_TAGS.contains(&tag) {
		return Err(CodecError::UnknownType { tag: tag.to_string() });
	}

	serde_json::from_value(value).map_err(|e| CodecError::InvalidPayload(e.to_string()))
}

/// Encode an outbound frame as one complete JSON text frame.
pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, CodecError> {
	serde_json::to_string(frame).map_err(|e| CodecError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
	use palaver_domain::MessageId;

	use super::*;

	#[test]
	fn decodes_send_message() {
		let frame = decode_client_frame(r#"{"type":"send_message","chat_id":"chat_1","text":"hello"}"#).expect("decode");
		let ClientFrame::SendMessage { chat_id, text } = frame;
		assert_eq!(chat_id.as_str(), "chat_1");
		assert_eq!(text, "hello");
	}

	#[test]
	fn unknown_tag_is_distinguished_from_bad_payload() {
		let err = decode_client_frame(r#"{"type":"ping"}"#).unwrap_err();
		assert_eq!(err.reason(), ErrorReason::UnknownType);

		let err = decode_client_frame(r#"{"type":"send_message","chat_id":"chat_1"}"#).unwrap_err();
		assert_eq!(err.reason(), ErrorReason::InvalidPayload);
	}

	#[test]
	fn non_object_and_non_json_are_invalid_payload() {
		for text in ["[1,2,3]", "\"send_message\"", "42", "not json at all", ""] {
			let err = decode_client_frame(text).unwrap_err();
			assert_eq!(err.reason(), ErrorReason::InvalidPayload, "input: {text:?}");
		}
	}

	#[test]
	fn missing_type_field_is_invalid_payload() {
		let err = decode_client_frame(r#"{"chat_id":"chat_1","text":"hi"}"#).unwrap_err();
		assert_eq!(err.reason(), ErrorReason::InvalidPayload);

		// A non-string `type` is shape-invalid, not an unknown tag.
		let err = decode_client_frame(r#"{"type":7}"#).unwrap_err();
		assert_eq!(err.reason(), ErrorReason::InvalidPayload);
	}

	#[test]
	fn oversized_frame_is_rejected() {
		let big = format!(r#"{{"type":"send_message","chat_id":"c","text":"{}"}}"#, "a".repeat(64));
		let err = decode_client_frame_with_limit(&big, 32).unwrap_err();
		match err {
			CodecError::FrameTooLarge { len, max } => {
				assert!(len > max);
			}
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[test]
	fn new_message_wire_shape_matches_observed_client() {
		let frame = ServerFrame::NewMessage {
			chat_id: ChatId::new("chat_1").unwrap(),
			message: Message {
				id: MessageId::FIRST,
				sender: UserId::new("alice").unwrap(),
				text: "hello".to_string(),
				time: 100,
			},
		};

		let encoded = encode_server_frame(&frame).expect("encode");
		let value: serde_json::Value = serde_json::from_str(&encoded).expect("json");
		assert_eq!(value["type"], "new_message");
		assert_eq!(value["chat_id"], "chat_1");
		assert_eq!(value["message"]["id"], 1);
		assert_eq!(value["message"]["sender"], "alice");
		assert_eq!(value["message"]["text"], "hello");
		assert_eq!(value["message"]["time"], 100);
	}

	#[test]
	fn protocol_error_reason_serializes_snake_case() {
		let encoded = encode_server_frame(&ServerFrame::ProtocolError {
			reason: ErrorReason::UnknownType,
		})
		.expect("encode");
		assert_eq!(encoded, r#"{"type":"protocol_error","reason":"unknown_type"}"#);
	}

	#[test]
	fn user_offline_carries_bare_user_id() {
		let encoded = encode_server_frame(&ServerFrame::UserOffline {
			user_id: UserId::new("bob").unwrap(),
		})
		.expect("encode");
		assert_eq!(encoded, r#"{"type":"user_offline","user_id":"bob"}"#);
	}
}
