#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use pantry_domain::{
	AuthUser, Conversation, ConversationId, ConversationKind, GroupMembership, GroupRole, Participant,
	ParticipantStatus, ThreadParticipant, UserId,
};
use pantry_store::{AuditEvent, AuditService, EntityStore};
use pantry_util::time::unix_ms_now;
use tracing::info;

use crate::error::ChatError;

/// Lifecycle and membership operations for conversations of every kind.
#[derive(Clone)]
pub struct ConversationService {
	store: Arc<dyn EntityStore>,
	audit: AuditService,
}

impl ConversationService {
	pub fn new(store: Arc<dyn EntityStore>, audit: AuditService) -> Self {
		Self { store, audit }
	}

	/// Create (or return) the direct conversation between the requester and
	/// `other`. Idempotent across argument order: the requester's existing
	/// direct conversations are scanned for an exact participant-set match.
	pub async fn create_direct(&self, requester: &AuthUser, other: &UserId) -> Result<Conversation, ChatError> {
		if requester.user_id == *other {
			return Err(ChatError::validation("user", "direct conversation requires two distinct users"));
		}

		let pair: BTreeSet<&UserId> = [&requester.user_id, other].into_iter().collect();
		for conversation in self.store.conversations_with_participant(&requester.user_id).await? {
			if conversation.kind != ConversationKind::Direct {
				continue;
			}
			let members: BTreeSet<UserId> = self
				.store
				.participants_of(conversation.id)
				.await?
				.into_iter()
				.map(|p| p.user_id)
				.collect();
			if members.len() == 2 && members.iter().collect::<BTreeSet<_>>() == pair {
				return Ok(conversation);
			}
		}

		let now = unix_ms_now();
		let conversation = Conversation {
			id: ConversationId::new_v4(),
			kind: ConversationKind::Direct,
			display_name: None,
			room: None,
			is_active: true,
			created_at: now,
		};
		self.store.insert_conversation(&conversation).await?;
		for user in [&requester.user_id, other] {
			self.store
				.insert_participant(&Participant {
					conversation_id: conversation.id,
					user_id: user.clone(),
					joined_at: now,
					last_read_at: None,
				})
				.await?;
		}

		self.audit.record_detached(
			AuditEvent::new("conversation.create_direct", "conversation", conversation.id.to_string(), requester.user_id.as_str())
				.with_after(serde_json::json!({ "participants": [requester.user_id.as_str(), other.as_str()] })),
		);

		Ok(conversation)
	}

	/// Create a group: the creator becomes group admin, everyone (creator
	/// included) gets a Participant row and an active thread row.
	pub async fn create_group(
		&self,
		creator: &AuthUser,
		name: &str,
		members: &[UserId],
	) -> Result<Conversation, ChatError> {
		let name = name.trim();
		if name.is_empty() {
			return Err(ChatError::validation("display_name", "group name must be non-empty"));
		}

		let now = unix_ms_now();
		let conversation = Conversation {
			id: ConversationId::new_v4(),
			kind: ConversationKind::Group,
			display_name: Some(name.to_string()),
			room: None,
			is_active: true,
			created_at: now,
		};
		self.store.insert_conversation(&conversation).await?;

		let mut seen: BTreeSet<&UserId> = BTreeSet::new();
		seen.insert(&creator.user_id);
		self.enroll_member(conversation.id, &creator.user_id, GroupRole::Admin, now).await?;

		for member in members {
			if !seen.insert(member) {
				continue;
			}
			self.enroll_member(conversation.id, member, GroupRole::Member, now).await?;
		}

		self.audit.record_detached(
			AuditEvent::new("group.create", "conversation", conversation.id.to_string(), creator.user_id.as_str())
				.with_after(serde_json::json!({
					"display_name": name,
					"members": seen.iter().map(|u| u.as_str()).collect::<Vec<_>>(),
				})),
		);

		Ok(conversation)
	}

	/// Idempotent channel creation; used to seed configured channels at
	/// startup. Reactivates a previously soft-deleted channel.
	pub async fn ensure_channel(&self, room: &str, display_name: &str) -> Result<Conversation, ChatError> {
		let room = room.trim();
		let display_name = display_name.trim();
		if room.is_empty() {
			return Err(ChatError::validation("room", "room name must be non-empty"));
		}
		if display_name.is_empty() {
			return Err(ChatError::validation("display_name", "channel name must be non-empty"));
		}

		if let Some(mut existing) = self.store.channel_conversation_by_room(room).await? {
			if !existing.is_active {
				self.store.set_conversation_active(existing.id, true).await?;
				existing.is_active = true;
				info!(room, conversation = %existing.id, "reactivated channel");
			}
			return Ok(existing);
		}

		let conversation = Conversation {
			id: ConversationId::new_v4(),
			kind: ConversationKind::Channel,
			display_name: Some(display_name.to_string()),
			room: Some(room.to_string()),
			is_active: true,
			created_at: unix_ms_now(),
		};
		self.store.insert_conversation(&conversation).await?;
		info!(room, conversation = %conversation.id, "created channel");
		Ok(conversation)
	}

	/// All active channels plus every conversation the user participates in,
	/// most recently active first.
	pub async fn list_conversations_for(&self, user: &UserId) -> Result<Vec<Conversation>, ChatError> {
		let mut conversations = self.store.channel_conversations().await?;
		let mut seen: BTreeSet<ConversationId> = conversations.iter().map(|c| c.id).collect();
		for conversation in self.store.conversations_with_participant(user).await? {
			if seen.insert(conversation.id) {
				conversations.push(conversation);
			}
		}

		let mut keyed = Vec::with_capacity(conversations.len());
		for conversation in conversations {
			let activity = self
				.store
				.latest_message_at(conversation.id)
				.await?
				.unwrap_or(conversation.created_at);
			keyed.push((activity, conversation));
		}
		keyed.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.0.cmp(&b.1.id.0)));

		Ok(keyed.into_iter().map(|(_, c)| c).collect())
	}

	/// Add users to a group. Already-present members are skipped silently
	/// and the call returns the number actually added; a fully duplicate
	/// request (or one that lost a concurrent race) reports zero added
	/// without erroring.
	pub async fn add_members(
		&self,
		group: ConversationId,
		users: &[UserId],
		requester: &AuthUser,
	) -> Result<usize, ChatError> {
		let conversation = self.active_group(group).await?;

		if !requester.is_platform_moderator() && self.store.participant(group, &requester.user_id).await?.is_none() {
			return Err(ChatError::Forbidden);
		}

		let requested: Vec<&UserId> = {
			let mut seen = BTreeSet::new();
			users.iter().filter(|u| seen.insert(*u)).collect()
		};
		if requested.is_empty() {
			return Err(ChatError::validation("users", "no users to add"));
		}

		let now = unix_ms_now();
		let mut added = 0usize;
		for user in requested {
			if self.readd_if_left(group, user, now).await? {
				added += 1;
				continue;
			}

			let was_new = self
				.store
				.insert_participant(&Participant {
					conversation_id: group,
					user_id: user.clone(),
					joined_at: now,
					last_read_at: None,
				})
				.await?;
			if was_new {
				self.store
					.insert_group_membership(&GroupMembership {
						conversation_id: group,
						user_id: user.clone(),
						role: GroupRole::Member,
					})
					.await?;
				self.store
					.insert_thread_participant(&ThreadParticipant {
						thread_id: group,
						user_id: user.clone(),
						status: ParticipantStatus::Active,
						joined_at: now,
						last_read_at: None,
						left_at: None,
						archived_at: None,
						muted_at: None,
					})
					.await?;
				added += 1;
			}
		}

		if added > 0 {
			self.audit.record_detached(
				AuditEvent::new("group.add_members", "conversation", conversation.id.to_string(), requester.user_id.as_str())
					.with_after(serde_json::json!({ "added": added })),
			);
		}

		Ok(added)
	}

	/// Remove a member. Allowed for platform admins, group admins, and the
	/// member themselves. History stays; the thread row is marked left.
	pub async fn remove_member(
		&self,
		group: ConversationId,
		user: &UserId,
		requester: &AuthUser,
	) -> Result<(), ChatError> {
		let conversation = self.active_group(group).await?;

		let self_leave = requester.user_id == *user;
		if !self_leave && !requester.is_platform_admin() && !self.is_group_admin(group, &requester.user_id).await? {
			return Err(ChatError::Forbidden);
		}

		if !self.store.delete_participant(group, user).await? {
			return Err(ChatError::NotFound);
		}
		self.store.delete_group_membership(group, user).await?;
		if self.store.thread_participant(group, user).await?.is_some() {
			self.store
				.set_thread_status(group, user, ParticipantStatus::Left, unix_ms_now())
				.await?;
		}

		self.audit.record_detached(
			AuditEvent::new("group.remove_member", "conversation", conversation.id.to_string(), requester.user_id.as_str())
				.with_before(serde_json::json!({ "user": user.as_str(), "self_leave": self_leave })),
		);

		Ok(())
	}

	/// Promote or demote a member within a group.
	pub async fn change_member_role(
		&self,
		group: ConversationId,
		user: &UserId,
		role: GroupRole,
		requester: &AuthUser,
	) -> Result<(), ChatError> {
		let conversation = self.active_group(group).await?;

		if !requester.is_platform_admin() && !self.is_group_admin(group, &requester.user_id).await? {
			return Err(ChatError::Forbidden);
		}

		let Some(membership) = self.store.group_membership(group, user).await? else {
			return Err(ChatError::NotFound);
		};
		if membership.role == role {
			return Ok(());
		}
		self.store.set_group_role(group, user, role).await?;

		self.audit.record_detached(
			AuditEvent::new("group.change_role", "conversation", conversation.id.to_string(), requester.user_id.as_str())
				.with_before(serde_json::json!({ "user": user.as_str(), "role": membership.role.as_str() }))
				.with_after(serde_json::json!({ "user": user.as_str(), "role": role.as_str() })),
		);

		Ok(())
	}

	/// Rename a group or channel. Direct conversations are never renamed.
	pub async fn rename_conversation(
		&self,
		id: ConversationId,
		name: &str,
		requester: &AuthUser,
	) -> Result<(), ChatError> {
		let conversation = self.active_conversation(id).await?;
		let name = name.trim();
		if name.is_empty() {
			return Err(ChatError::validation("display_name", "name must be non-empty"));
		}

		let allowed = match conversation.kind {
			ConversationKind::Direct => {
				return Err(ChatError::validation("kind", "direct conversations cannot be renamed"));
			}
			ConversationKind::Group => requester.is_platform_admin() || self.is_group_admin(id, &requester.user_id).await?,
			ConversationKind::Channel => requester.is_platform_moderator(),
		};
		if !allowed {
			return Err(ChatError::Forbidden);
		}

		self.store.rename_conversation(id, name).await?;

		self.audit.record_detached(
			AuditEvent::new("conversation.rename", "conversation", id.to_string(), requester.user_id.as_str())
				.with_before(serde_json::json!({ "display_name": conversation.display_name }))
				.with_after(serde_json::json!({ "display_name": name })),
		);

		Ok(())
	}

	/// Soft-delete a group: memberships and thread rows are removed, the
	/// conversation is marked inactive, message history is retained.
	pub async fn delete_group(&self, group: ConversationId, requester: &AuthUser) -> Result<(), ChatError> {
		let conversation = self.active_group(group).await?;

		if !requester.is_platform_admin() {
			return Err(ChatError::Forbidden);
		}

		self.store.delete_group_memberships(group).await?;
		self.store.delete_thread_participants(group).await?;
		self.store.set_conversation_active(group, false).await?;

		self.audit.record_detached(
			AuditEvent::new("group.delete", "conversation", group.to_string(), requester.user_id.as_str())
				.with_before(serde_json::json!({ "display_name": conversation.display_name })),
		);

		Ok(())
	}

	async fn active_conversation(&self, id: ConversationId) -> Result<Conversation, ChatError> {
		match self.store.conversation(id).await? {
			Some(c) if c.is_active => Ok(c),
			_ => Err(ChatError::NotFound),
		}
	}

	async fn active_group(&self, id: ConversationId) -> Result<Conversation, ChatError> {
		let conversation = self.active_conversation(id).await?;
		if conversation.kind != ConversationKind::Group {
			return Err(ChatError::validation("kind", "conversation is not a group"));
		}
		Ok(conversation)
	}

	async fn is_group_admin(&self, group: ConversationId, user: &UserId) -> Result<bool, ChatError> {
		Ok(self
			.store
			.group_membership(group, user)
			.await?
			.is_some_and(|m| m.role == GroupRole::Admin))
	}

	/// Explicit re-add is the only path that revives a left member.
	async fn readd_if_left(&self, group: ConversationId, user: &UserId, now: i64) -> Result<bool, ChatError> {
		let Some(tp) = self.store.thread_participant(group, user).await? else {
			return Ok(false);
		};
		if tp.status != ParticipantStatus::Left {
			return Ok(false);
		}

		self.store
			.set_thread_status(group, user, ParticipantStatus::Active, now)
			.await?;
		self.store
			.insert_participant(&Participant {
				conversation_id: group,
				user_id: user.clone(),
				joined_at: now,
				last_read_at: None,
			})
			.await?;
		self.store
			.insert_group_membership(&GroupMembership {
				conversation_id: group,
				user_id: user.clone(),
				role: GroupRole::Member,
			})
			.await?;
		Ok(true)
	}

	async fn enroll_member(
		&self,
		conversation: ConversationId,
		user: &UserId,
		role: GroupRole,
		now: i64,
	) -> Result<(), ChatError> {
		self.store
			.insert_participant(&Participant {
				conversation_id: conversation,
				user_id: user.clone(),
				joined_at: now,
				last_read_at: None,
			})
			.await?;
		self.store
			.insert_group_membership(&GroupMembership {
				conversation_id: conversation,
				user_id: user.clone(),
				role,
			})
			.await?;
		self.store
			.insert_thread_participant(&ThreadParticipant {
				thread_id: conversation,
				user_id: user.clone(),
				status: ParticipantStatus::Active,
				joined_at: now,
				last_read_at: None,
				left_at: None,
				archived_at: None,
				muted_at: None,
			})
			.await?;
		Ok(())
	}
}
