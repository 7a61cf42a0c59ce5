#![forbid(unsafe_code)]

use std::sync::Arc;

use pantry_domain::{ConversationId, ParticipantStatus, ThreadParticipant, UserId};
use pantry_store::EntityStore;
use pantry_util::time::unix_ms_now;

use crate::error::ChatError;

/// Per-user thread participation state machine.
///
/// Allowed transitions: `active -> {archived, left, muted}` and back to
/// `active` from `archived`/`muted`. `left` is terminal here; only an
/// explicit re-add through the conversation service revives it.
#[derive(Clone)]
pub struct ThreadStateService {
	store: Arc<dyn EntityStore>,
}

impl ThreadStateService {
	pub fn new(store: Arc<dyn EntityStore>) -> Self {
		Self { store }
	}

	/// Transition the user's row to `status`. Same-status calls are
	/// idempotent no-ops; invalid transitions are validation errors.
	pub async fn set_status(
		&self,
		thread: ConversationId,
		user: &UserId,
		status: ParticipantStatus,
	) -> Result<ThreadParticipant, ChatError> {
		let Some(current) = self.store.thread_participant(thread, user).await? else {
			return Err(ChatError::NotFound);
		};

		if current.status == status {
			return Ok(current);
		}

		if !transition_allowed(current.status, status) {
			return Err(ChatError::validation(
				"status",
				format!("invalid transition {} -> {}", current.status, status),
			));
		}

		self.store.set_thread_status(thread, user, status, unix_ms_now()).await?;
		self.store
			.thread_participant(thread, user)
			.await?
			.ok_or(ChatError::NotFound)
	}

	/// Stamp `last_read_at = now` on the thread row. Monotonic (the store
	/// never lets it decrease) and independent of participation status.
	pub async fn mark_read(&self, thread: ConversationId, user: &UserId) -> Result<i64, ChatError> {
		if self.store.thread_participant(thread, user).await?.is_none() {
			return Err(ChatError::NotFound);
		}

		let now = unix_ms_now();
		self.store.set_thread_last_read(thread, user, now).await?;
		Ok(now)
	}

	/// Same as `mark_read` but for direct/group Participant rows.
	pub async fn mark_conversation_read(&self, conversation: ConversationId, user: &UserId) -> Result<i64, ChatError> {
		if self.store.participant(conversation, user).await?.is_none() {
			return Err(ChatError::NotFound);
		}

		let now = unix_ms_now();
		self.store.set_participant_last_read(conversation, user, now).await?;
		Ok(now)
	}

	/// True iff a row exists and the user has not left.
	pub async fn visible_to(&self, thread: ConversationId, user: &UserId) -> Result<bool, ChatError> {
		Ok(self
			.store
			.thread_participant(thread, user)
			.await?
			.is_some_and(|tp| tp.is_visible()))
	}

	/// Messages newer than the user's `last_read_at`, excluding their own.
	/// Muted threads still accumulate unread counts.
	pub async fn unread_count(&self, thread: ConversationId, user: &UserId) -> Result<u64, ChatError> {
		let Some(row) = self.store.thread_participant(thread, user).await? else {
			return Err(ChatError::NotFound);
		};

		Ok(self.store.count_messages_since(thread, user, row.last_read_at).await?)
	}
}

fn transition_allowed(from: ParticipantStatus, to: ParticipantStatus) -> bool {
	use ParticipantStatus::*;
	matches!((from, to), (Active, Archived) | (Active, Left) | (Active, Muted) | (Archived, Active) | (Muted, Active))
}
