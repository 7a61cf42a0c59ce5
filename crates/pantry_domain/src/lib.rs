#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers and symbolic values from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
	#[error("empty value")]
	Empty,
	#[error("unknown conversation kind: {0}")]
	UnknownKind(String),
	#[error("unknown participant status: {0}")]
	UnknownStatus(String),
	#[error("unknown role: {0}")]
	UnknownRole(String),
}

/// Opaque user identifier issued by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
	/// Create a non-empty `UserId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseError::Empty);
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

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for UserId {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		UserId::new(s.to_string())
	}
}

/// Server-assigned conversation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub uuid::Uuid);

impl ConversationId {
	/// Create a new random conversation id.
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for ConversationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Server-assigned message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub uuid::Uuid);

impl MessageId {
	/// Create a new random message id.
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Supported conversation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
	Direct,
	Group,
	Channel,
}

impl ConversationKind {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			ConversationKind::Direct => "direct",
			ConversationKind::Group => "group",
			ConversationKind::Channel => "channel",
		}
	}
}

impl fmt::Display for ConversationKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ConversationKind {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"direct" => Ok(ConversationKind::Direct),
			"group" => Ok(ConversationKind::Group),
			"channel" => Ok(ConversationKind::Channel),
			other => Err(ParseError::UnknownKind(other.to_string())),
		}
	}
}

/// A user's individual relationship to a group thread.
///
/// Independent per user: one member leaving never affects the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
	Active,
	Archived,
	Left,
	Muted,
}

impl ParticipantStatus {
	pub const fn as_str(self) -> &'static str {
		match self {
			ParticipantStatus::Active => "active",
			ParticipantStatus::Archived => "archived",
			ParticipantStatus::Left => "left",
			ParticipantStatus::Muted => "muted",
		}
	}
}

impl fmt::Display for ParticipantStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ParticipantStatus {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"active" => Ok(ParticipantStatus::Active),
			"archived" => Ok(ParticipantStatus::Archived),
			"left" => Ok(ParticipantStatus::Left),
			"muted" => Ok(ParticipantStatus::Muted),
			other => Err(ParseError::UnknownStatus(other.to_string())),
		}
	}
}

/// Role inside a single group, distinct from the platform role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
	Admin,
	Member,
}

impl GroupRole {
	pub const fn as_str(self) -> &'static str {
		match self {
			GroupRole::Admin => "admin",
			GroupRole::Member => "member",
		}
	}
}

impl fmt::Display for GroupRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for GroupRole {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"" => Err(ParseError::Empty),
			"admin" => Ok(GroupRole::Admin),
			"member" => Ok(GroupRole::Member),
			other => Err(ParseError::UnknownRole(other.to_string())),
		}
	}
}

/// Platform-wide role resolved by the authentication collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformRole {
	Admin,
	Moderator,
	Volunteer,
}

impl PlatformRole {
	pub const fn as_str(self) -> &'static str {
		match self {
			PlatformRole::Admin => "admin",
			PlatformRole::Moderator => "moderator",
			PlatformRole::Volunteer => "volunteer",
		}
	}
}

impl fmt::Display for PlatformRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for PlatformRole {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"" => Err(ParseError::Empty),
			"admin" => Ok(PlatformRole::Admin),
			"moderator" => Ok(PlatformRole::Moderator),
			"volunteer" => Ok(PlatformRole::Volunteer),
			other => Err(ParseError::UnknownRole(other.to_string())),
		}
	}
}

/// An addressable container of messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
	pub id: ConversationId,
	pub kind: ConversationKind,
	/// Required for group/channel, absent for direct.
	pub display_name: Option<String>,
	/// Symbolic room name; set for channels only.
	pub room: Option<String>,
	pub is_active: bool,
	pub created_at: i64,
}

/// A user's membership record in a direct/group conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
	pub conversation_id: ConversationId,
	pub user_id: UserId,
	pub joined_at: i64,
	/// Monotonically non-decreasing; mutated by the reading user only.
	pub last_read_at: Option<i64>,
}

/// An append-only chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
	pub id: MessageId,
	pub conversation_id: ConversationId,
	pub user_id: UserId,
	pub content: String,
	/// Captured at write time so history displays correctly after renames.
	pub sender_display_name: String,
	pub created_at: i64,
}

/// Logical group ownership/role record, decoupled from the live thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
	pub conversation_id: ConversationId,
	pub user_id: UserId,
	pub role: GroupRole,
}

/// Per-user thread state; the authority for visibility and live delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadParticipant {
	pub thread_id: ConversationId,
	pub user_id: UserId,
	pub status: ParticipantStatus,
	pub joined_at: i64,
	pub last_read_at: Option<i64>,
	pub left_at: Option<i64>,
	pub archived_at: Option<i64>,
	pub muted_at: Option<i64>,
}

impl ThreadParticipant {
	/// Whether the thread is visible to this participant at all.
	pub fn is_visible(&self) -> bool {
		self.status != ParticipantStatus::Left
	}

	/// Whether this participant receives live push for new messages.
	pub fn receives_live_push(&self) -> bool {
		matches!(self.status, ParticipantStatus::Active | ParticipantStatus::Archived)
	}
}

/// The resolved current user attached to every request/connection.
///
/// The core trusts this value; credential validation happens upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
	pub user_id: UserId,
	pub role: PlatformRole,
	pub capabilities: BTreeSet<String>,
	pub display_name: Option<String>,
	pub first_name: Option<String>,
	pub last_name: Option<String>,
	pub email: Option<String>,
}

impl AuthUser {
	pub fn has_capability(&self, capability: &str) -> bool {
		self.capabilities.contains(capability)
	}

	pub fn is_platform_admin(&self) -> bool {
		self.role == PlatformRole::Admin
	}

	pub fn is_platform_moderator(&self) -> bool {
		matches!(self.role, PlatformRole::Admin | PlatformRole::Moderator)
	}

	/// Display name stamped onto messages at write time.
	///
	/// Falls back through "first last", then the email local part.
	pub fn resolved_display_name(&self) -> String {
		if let Some(name) = self.display_name.as_deref().map(str::trim)
			&& !name.is_empty()
		{
			return name.to_string();
		}

		let first = self.first_name.as_deref().map(str::trim).unwrap_or_default();
		let last = self.last_name.as_deref().map(str::trim).unwrap_or_default();
		match (first.is_empty(), last.is_empty()) {
			(false, false) => return format!("{first} {last}"),
			(false, true) => return first.to_string(),
			(true, false) => return last.to_string(),
			(true, true) => {}
		}

		if let Some(email) = self.email.as_deref().map(str::trim)
			&& !email.is_empty()
		{
			let local = email.split('@').next().unwrap_or(email);
			if !local.is_empty() {
				return local.to_string();
			}
		}

		"Unknown User".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn user(display: Option<&str>, first: Option<&str>, last: Option<&str>, email: Option<&str>) -> AuthUser {
		AuthUser {
			user_id: UserId::new("u1").unwrap(),
			role: PlatformRole::Volunteer,
			capabilities: BTreeSet::new(),
			display_name: display.map(str::to_string),
			first_name: first.map(str::to_string),
			last_name: last.map(str::to_string),
			email: email.map(str::to_string),
		}
	}

	#[test]
	fn kind_parse_and_display() {
		assert_eq!("group".parse::<ConversationKind>().unwrap(), ConversationKind::Group);
		assert_eq!("  Channel ".parse::<ConversationKind>().unwrap(), ConversationKind::Channel);
		assert_eq!(ConversationKind::Direct.to_string(), "direct");
		assert!("committee".parse::<ConversationKind>().is_err());
	}

	#[test]
	fn status_parse_rejects_unknown() {
		assert_eq!("muted".parse::<ParticipantStatus>().unwrap(), ParticipantStatus::Muted);
		assert_eq!("".parse::<ParticipantStatus>(), Err(ParseError::Empty));
		assert!(matches!(
			"banned".parse::<ParticipantStatus>(),
			Err(ParseError::UnknownStatus(_))
		));
	}

	#[test]
	fn rejects_empty_user_ids() {
		assert!(UserId::new("").is_err());
		assert!(UserId::new("   ").is_err());
		assert!("u42".parse::<UserId>().is_ok());
	}

	#[test]
	fn display_name_fallback_chain() {
		assert_eq!(
			user(Some("Ops Lead"), Some("Ann"), Some("Smith"), Some("ann@example.org")).resolved_display_name(),
			"Ops Lead"
		);
		assert_eq!(
			user(Some("  "), Some("Ann"), Some("Smith"), None).resolved_display_name(),
			"Ann Smith"
		);
		assert_eq!(user(None, Some("Ann"), None, None).resolved_display_name(), "Ann");
		assert_eq!(
			user(None, None, None, Some("ann.smith@example.org")).resolved_display_name(),
			"ann.smith"
		);
		assert_eq!(user(None, None, None, None).resolved_display_name(), "Unknown User");
	}

	#[test]
	fn thread_participant_visibility() {
		let mut tp = ThreadParticipant {
			thread_id: ConversationId::new_v4(),
			user_id: UserId::new("u1").unwrap(),
			status: ParticipantStatus::Active,
			joined_at: 0,
			last_read_at: None,
			left_at: None,
			archived_at: None,
			muted_at: None,
		};
		assert!(tp.is_visible());
		assert!(tp.receives_live_push());

		tp.status = ParticipantStatus::Muted;
		assert!(tp.is_visible());
		assert!(!tp.receives_live_push());

		tp.status = ParticipantStatus::Left;
		assert!(!tp.is_visible());
		assert!(!tp.receives_live_push());
	}
}
