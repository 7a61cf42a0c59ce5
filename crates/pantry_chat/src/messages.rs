#![forbid(unsafe_code)]

use std::sync::Arc;

use pantry_domain::{AuthUser, Conversation, ConversationId, ConversationKind, Message, MessageId, ParticipantStatus};
use pantry_store::{AuditEvent, AuditService, EntityStore};
use pantry_util::time::unix_ms_now;
use tracing::debug;

use crate::broadcast::NotificationBroadcaster;
use crate::error::ChatError;
use crate::permissions::PermissionResolver;

/// Default page size for history reads.
pub const DEFAULT_MESSAGE_PAGE: usize = 50;
/// Hard cap on a single history page.
pub const MAX_MESSAGE_PAGE: usize = 200;

/// Posting, deleting, and reading messages.
#[derive(Clone)]
pub struct MessageService {
	store: Arc<dyn EntityStore>,
	permissions: Arc<PermissionResolver>,
	broadcaster: NotificationBroadcaster,
	audit: AuditService,
}

impl MessageService {
	pub fn new(
		store: Arc<dyn EntityStore>,
		permissions: Arc<PermissionResolver>,
		broadcaster: NotificationBroadcaster,
		audit: AuditService,
	) -> Self {
		Self {
			store,
			permissions,
			broadcaster,
			audit,
		}
	}

	/// Validate, persist, and fan out a new message.
	///
	/// The broadcast runs in a detached task; its failures are logged there
	/// and never affect the returned message.
	pub async fn post_message(
		&self,
		conversation: ConversationId,
		author: &AuthUser,
		content: &str,
	) -> Result<Message, ChatError> {
		let content = content.trim();
		if content.is_empty() {
			return Err(ChatError::validation("content", "message content must be non-empty"));
		}

		let conversation = self.active_conversation(conversation).await?;
		self.check_post_access(&conversation, author).await?;

		let message = Message {
			id: MessageId::new_v4(),
			conversation_id: conversation.id,
			user_id: author.user_id.clone(),
			content: content.to_string(),
			sender_display_name: author.resolved_display_name(),
			created_at: unix_ms_now(),
		};
		self.store.insert_message(&message).await?;

		let broadcaster = self.broadcaster.clone();
		let conv = conversation.clone();
		let msg = message.clone();
		tokio::spawn(async move {
			broadcaster.broadcast(&conv, &msg).await;
		});

		Ok(message)
	}

	/// Hard-delete a message. Allowed for the author, platform
	/// moderators/admins, and holders of the moderation capability.
	pub async fn delete_message(&self, id: MessageId, requester: &AuthUser) -> Result<(), ChatError> {
		let Some(message) = self.store.message(id).await? else {
			return Err(ChatError::NotFound);
		};

		let allowed = message.user_id == requester.user_id
			|| requester.is_platform_moderator()
			|| requester.has_capability("chat_moderate");
		if !allowed {
			return Err(ChatError::Forbidden);
		}

		if !self.store.delete_message(id).await? {
			return Err(ChatError::NotFound);
		}

		let before = serde_json::to_value(&message).unwrap_or(serde_json::Value::Null);
		self.audit.record_detached(
			AuditEvent::new("message.delete", "message", id.to_string(), requester.user_id.as_str()).with_before(before),
		);

		Ok(())
	}

	/// Read history ascending by creation time. A requester who left a group
	/// thread gets an empty page, not an error.
	pub async fn list_messages(
		&self,
		conversation: ConversationId,
		requester: &AuthUser,
		limit: Option<usize>,
	) -> Result<Vec<Message>, ChatError> {
		let limit = limit.unwrap_or(DEFAULT_MESSAGE_PAGE).min(MAX_MESSAGE_PAGE);

		let Some(conversation) = self.store.conversation(conversation).await? else {
			return Err(ChatError::NotFound);
		};

		if !conversation.is_active {
			// Former members of a deleted group see empty history rather
			// than an error.
			let was_member = self.store.participant(conversation.id, &requester.user_id).await?.is_some()
				|| self
					.store
					.thread_participant(conversation.id, &requester.user_id)
					.await?
					.is_some();
			return if was_member { Ok(Vec::new()) } else { Err(ChatError::NotFound) };
		}

		match conversation.kind {
			ConversationKind::Channel => {
				if !self.channel_access(&conversation, requester) {
					return Err(ChatError::Forbidden);
				}
			}
			ConversationKind::Group => {
				let Some(tp) = self.store.thread_participant(conversation.id, &requester.user_id).await? else {
					return Err(ChatError::Forbidden);
				};
				if tp.status == ParticipantStatus::Left {
					return Ok(Vec::new());
				}
			}
			ConversationKind::Direct => {
				if self.store.participant(conversation.id, &requester.user_id).await?.is_none() {
					return Err(ChatError::Forbidden);
				}
			}
		}

		Ok(self.store.messages_in(conversation.id, limit).await?)
	}

	async fn active_conversation(
		&self,
		id: ConversationId,
	) -> Result<Conversation, ChatError> {
		match self.store.conversation(id).await? {
			Some(c) if c.is_active => Ok(c),
			_ => Err(ChatError::NotFound),
		}
	}

	async fn check_post_access(&self, conversation: &Conversation, author: &AuthUser) -> Result<(), ChatError> {
		match conversation.kind {
			ConversationKind::Channel => {
				if !self.channel_access(conversation, author) {
					return Err(ChatError::Forbidden);
				}
			}
			ConversationKind::Group => {
				let tp = self.store.thread_participant(conversation.id, &author.user_id).await?;
				match tp {
					Some(tp) if tp.status != ParticipantStatus::Left => {}
					_ => return Err(ChatError::Forbidden),
				}
			}
			ConversationKind::Direct => {
				if self.store.participant(conversation.id, &author.user_id).await?.is_none() {
					return Err(ChatError::Forbidden);
				}
			}
		}
		Ok(())
	}

	fn channel_access(&self, conversation: &Conversation, user: &AuthUser) -> bool {
		let Some(room) = conversation.room.as_deref() else {
			debug!(conversation = %conversation.id, "channel conversation without a room");
			return false;
		};
		self.permissions.can_access(user, room)
	}
}
