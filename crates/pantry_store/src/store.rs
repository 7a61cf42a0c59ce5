#![forbid(unsafe_code)]

use pantry_domain::{
	Conversation, ConversationId, GroupMembership, GroupRole, Message, MessageId, Participant, ParticipantStatus,
	PlatformRole, ThreadParticipant, UserId,
};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Read-only mirror of the authentication collaborator's view of a user.
///
/// Kept in the store so channel fan-out audiences can be computed without
/// calling back into the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
	pub id: UserId,
	pub display_name: Option<String>,
	pub first_name: Option<String>,
	pub last_name: Option<String>,
	pub email: Option<String>,
	pub role: PlatformRole,
	pub capabilities: Vec<String>,
}

impl UserRecord {
	pub fn has_capability(&self, capability: &str) -> bool {
		self.capabilities.iter().any(|c| c == capability)
	}
}

/// Persistence interface for the conversation core.
///
/// Backends serialize conflicting writes; uniqueness of (conversation, user)
/// pairs is enforced here, not in the services. Insert methods returning
/// `bool` report whether a new row was created (`false` means the row already
/// existed, which callers treat as an idempotent no-op).
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
	// Conversations.
	async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;
	async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError>;
	async fn channel_conversation_by_room(&self, room: &str) -> Result<Option<Conversation>, StoreError>;
	/// All active channel conversations.
	async fn channel_conversations(&self) -> Result<Vec<Conversation>, StoreError>;
	/// Active conversations where the user has a Participant row.
	async fn conversations_with_participant(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError>;
	async fn rename_conversation(&self, id: ConversationId, display_name: &str) -> Result<bool, StoreError>;
	async fn set_conversation_active(&self, id: ConversationId, active: bool) -> Result<bool, StoreError>;

	// Participants.
	async fn insert_participant(&self, participant: &Participant) -> Result<bool, StoreError>;
	async fn participant(&self, conversation: ConversationId, user: &UserId) -> Result<Option<Participant>, StoreError>;
	async fn participants_of(&self, conversation: ConversationId) -> Result<Vec<Participant>, StoreError>;
	async fn delete_participant(&self, conversation: ConversationId, user: &UserId) -> Result<bool, StoreError>;
	/// Monotonic: the stored value never decreases.
	async fn set_participant_last_read(
		&self,
		conversation: ConversationId,
		user: &UserId,
		at: i64,
	) -> Result<bool, StoreError>;

	// Messages.
	async fn insert_message(&self, message: &Message) -> Result<(), StoreError>;
	async fn message(&self, id: MessageId) -> Result<Option<Message>, StoreError>;
	async fn delete_message(&self, id: MessageId) -> Result<bool, StoreError>;
	/// Messages ordered by creation time ascending, capped at `limit`.
	async fn messages_in(&self, conversation: ConversationId, limit: usize) -> Result<Vec<Message>, StoreError>;
	async fn latest_message_at(&self, conversation: ConversationId) -> Result<Option<i64>, StoreError>;
	/// Messages newer than `since` not authored by `user`.
	async fn count_messages_since(
		&self,
		conversation: ConversationId,
		user: &UserId,
		since: Option<i64>,
	) -> Result<u64, StoreError>;

	// Group memberships.
	async fn insert_group_membership(&self, membership: &GroupMembership) -> Result<bool, StoreError>;
	async fn group_membership(
		&self,
		conversation: ConversationId,
		user: &UserId,
	) -> Result<Option<GroupMembership>, StoreError>;
	async fn group_memberships_of(&self, conversation: ConversationId) -> Result<Vec<GroupMembership>, StoreError>;
	async fn set_group_role(&self, conversation: ConversationId, user: &UserId, role: GroupRole)
	-> Result<bool, StoreError>;
	async fn delete_group_membership(&self, conversation: ConversationId, user: &UserId) -> Result<bool, StoreError>;
	async fn delete_group_memberships(&self, conversation: ConversationId) -> Result<u64, StoreError>;

	// Thread participants.
	async fn insert_thread_participant(&self, participant: &ThreadParticipant) -> Result<bool, StoreError>;
	async fn thread_participant(
		&self,
		thread: ConversationId,
		user: &UserId,
	) -> Result<Option<ThreadParticipant>, StoreError>;
	async fn thread_participants_of(&self, thread: ConversationId) -> Result<Vec<ThreadParticipant>, StoreError>;
	/// Update status and timestamp stamps for an existing row.
	async fn set_thread_status(
		&self,
		thread: ConversationId,
		user: &UserId,
		status: ParticipantStatus,
		stamped_at: i64,
	) -> Result<bool, StoreError>;
	/// Monotonic: the stored value never decreases.
	async fn set_thread_last_read(&self, thread: ConversationId, user: &UserId, at: i64) -> Result<bool, StoreError>;
	async fn delete_thread_participants(&self, thread: ConversationId) -> Result<u64, StoreError>;

	// Users.
	async fn upsert_user(&self, user: &UserRecord) -> Result<(), StoreError>;
	async fn user(&self, id: &UserId) -> Result<Option<UserRecord>, StoreError>;
	async fn users_with_capability(&self, capability: &str) -> Result<Vec<UserRecord>, StoreError>;
}
