#![forbid(unsafe_code)]

pub mod frame;

pub use frame::{
	ChatSnapshot, ClientFrame, CodecError, DEFAULT_MAX_FRAME_BYTES, ErrorReason, ServerFrame, decode_client_frame,
	decode_client_frame_with_limit, encode_server_frame,
};

/// Protocol version constants.
pub mod version {
	/// Current protocol major version (v1).
	pub const PROTOCOL_MAJOR: u32 = 1;
	/// Current protocol minor version.
	pub const PROTOCOL_MINOR: u32 = 0;

	/// Compact representation useful for logs/metrics.
	pub const PROTOCOL_VERSION_U32: u32 = (PROTOCOL_MAJOR << 16) | PROTOCOL_MINOR;
}
