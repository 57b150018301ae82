#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown chat kind: {0}")]
	UnknownKind(String),
}

/// Case-normalized user identifier.
///
/// Callers supply identifiers in arbitrary case; two spellings of the same
/// identifier must map to the same user, so construction trims and
/// ASCII-lowercases. Deserialization goes through the same validation, so a
/// blank id can never enter through the wire or a data file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct UserId(String);

impl UserId {
	/// Create a non-empty, normalized `UserId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		let id = id.trim();
		if id.is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id.to_ascii_lowercase()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for UserId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		UserId::new(s)
	}
}

impl TryFrom<String> for UserId {
	type Error = ParseIdError;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		UserId::new(s)
	}
}

impl From<UserId> for String {
	fn from(id: UserId) -> String {
		id.0
	}
}

/// Opaque chat identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ChatId(String);

impl ChatId {
	/// Create a non-empty `ChatId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for ChatId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ChatId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChatId::new(s.to_string())
	}
}

impl TryFrom<String> for ChatId {
	type Error = ParseIdError;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		ChatId::new(s)
	}
}

impl From<ChatId> for String {
	fn from(id: ChatId) -> String {
		id.0
	}
}

/// Chat membership shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
	/// Exactly two participants.
	Private,
	/// Two or more participants.
	Group,
}

impl ChatKind {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			ChatKind::Private => "private",
			ChatKind::Group => "group",
		}
	}
}

impl fmt::Display for ChatKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ChatKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"private" => Ok(ChatKind::Private),
			"group" => Ok(ChatKind::Group),
			other => Err(ParseIdError::UnknownKind(other.to_string())),
		}
	}
}

/// Server-assigned message identifier, unique and monotonic within one chat.
///
/// The first message of a chat gets id 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
	pub const FIRST: MessageId = MessageId(1);

	/// The id following this one.
	pub const fn next(self) -> MessageId {
		MessageId(self.0 + 1)
	}

	pub const fn as_u64(self) -> u64 {
		self.0
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A single immutable chat message.
///
/// `time` is the server-assigned append timestamp in unix milliseconds; the
/// client-supplied clock is never trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
	pub id: MessageId,
	pub sender: UserId,
	pub text: String,
	pub time: i64,
}

/// Display metadata for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
	pub id: UserId,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub avatar: Option<String>,
}

impl UserProfile {
	/// Profile with no directory entry: display name falls back to the id.
	pub fn placeholder(id: UserId) -> Self {
		let name = id.as_str().to_string();
		Self { id, name, avatar: None }
	}
}
