#![forbid(unsafe_code)]

pub mod framing;

pub use framing::{
	DEFAULT_MAX_FRAME_SIZE, FramingError, decode_frame, encode_frame, encode_frame_default, encode_frame_into,
	frame_len_from_payload_len, try_decode_frame_from_buffer,
};

use pantry_domain::Message;
use serde::{Deserialize, Serialize};

/// Protocol version constants.
pub mod version {
	/// Current protocol major version (v1).
	pub const PROTOCOL_MAJOR: u32 = 1;
	/// Current protocol minor version.
	pub const PROTOCOL_MINOR: u32 = 0;

	/// Compact representation useful for logs/metrics.
	pub const PROTOCOL_VERSION_U32: u32 = (PROTOCOL_MAJOR << 16) | PROTOCOL_MINOR;
}

/// Frames sent by clients on the live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
	/// First frame on every connection; carries the stateless access token.
	Identify { token: String },
}

/// Message payload pushed on the live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
	pub id: String,
	pub conversation_id: String,
	pub user_id: String,
	pub content: String,
	pub sender_display_name: String,
	pub created_at: i64,
}

impl From<&Message> for MessageEvent {
	fn from(m: &Message) -> Self {
		Self {
			id: m.id.to_string(),
			conversation_id: m.conversation_id.to_string(),
			user_id: m.user_id.as_str().to_string(),
			content: m.content.clone(),
			sender_display_name: m.sender_display_name.clone(),
			created_at: m.created_at,
		}
	}
}

/// Frames pushed by the server on the live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
	/// Acknowledges a successful identify.
	Identified { user_id: String, server_time_unix_ms: i64 },

	/// A newly persisted message the connected user should see.
	NewMessage { message: MessageEvent, timestamp: i64 },

	/// Protocol-level error, usually followed by connection close.
	Error { code: String, message: String },
}
