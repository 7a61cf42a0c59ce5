#![forbid(unsafe_code)]

use std::collections::HashMap;

use pantry_domain::{
	Conversation, ConversationId, ConversationKind, GroupMembership, GroupRole, Message, MessageId, Participant,
	ParticipantStatus, ThreadParticipant, UserId,
};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::store::{EntityStore, UserRecord};

/// In-memory entity store for tests and ephemeral deployments.
///
/// All state lives behind a single store-scoped mutex; nothing outside this
/// type ever holds the lock.
#[derive(Default)]
pub struct InMemoryStore {
	inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
	conversations: HashMap<ConversationId, Conversation>,
	participants: HashMap<(ConversationId, UserId), Participant>,
	messages: HashMap<MessageId, Message>,
	memberships: HashMap<(ConversationId, UserId), GroupMembership>,
	thread_participants: HashMap<(ConversationId, UserId), ThreadParticipant>,
	users: HashMap<UserId, UserRecord>,
}

impl InMemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait::async_trait]
impl EntityStore for InMemoryStore {
	async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.conversations.insert(conversation.id, conversation.clone());
		Ok(())
	}

	async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.conversations.get(&id).cloned())
	}

	async fn channel_conversation_by_room(&self, room: &str) -> Result<Option<Conversation>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner
			.conversations
			.values()
			.find(|c| c.kind == ConversationKind::Channel && c.room.as_deref() == Some(room))
			.cloned())
	}

	async fn channel_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
		let inner = self.inner.lock().await;
		let mut out: Vec<Conversation> = inner
			.conversations
			.values()
			.filter(|c| c.kind == ConversationKind::Channel && c.is_active)
			.cloned()
			.collect();
		out.sort_by_key(|c| c.created_at);
		Ok(out)
	}

	async fn conversations_with_participant(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError> {
		let inner = self.inner.lock().await;
		let mut out = Vec::new();
		for ((conversation_id, participant_id), _) in inner.participants.iter() {
			if participant_id != user {
				continue;
			}
			if let Some(conv) = inner.conversations.get(conversation_id)
				&& conv.is_active
			{
				out.push(conv.clone());
			}
		}
		out.sort_by_key(|c| c.created_at);
		Ok(out)
	}

	async fn rename_conversation(&self, id: ConversationId, display_name: &str) -> Result<bool, StoreError> {
		let mut inner = self.inner.lock().await;
		match inner.conversations.get_mut(&id) {
			Some(conv) => {
				conv.display_name = Some(display_name.to_string());
				Ok(true)
			}
			None => Ok(false),
		}
	}

	async fn set_conversation_active(&self, id: ConversationId, active: bool) -> Result<bool, StoreError> {
		let mut inner = self.inner.lock().await;
		match inner.conversations.get_mut(&id) {
			Some(conv) => {
				conv.is_active = active;
				Ok(true)
			}
			None => Ok(false),
		}
	}

	async fn insert_participant(&self, participant: &Participant) -> Result<bool, StoreError> {
		let mut inner = self.inner.lock().await;
		let key = (participant.conversation_id, participant.user_id.clone());
		if inner.participants.contains_key(&key) {
			return Ok(false);
		}
		inner.participants.insert(key, participant.clone());
		Ok(true)
	}

	async fn participant(&self, conversation: ConversationId, user: &UserId) -> Result<Option<Participant>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.participants.get(&(conversation, user.clone())).cloned())
	}

	async fn participants_of(&self, conversation: ConversationId) -> Result<Vec<Participant>, StoreError> {
		let inner = self.inner.lock().await;
		let mut out: Vec<Participant> = inner
			.participants
			.values()
			.filter(|p| p.conversation_id == conversation)
			.cloned()
			.collect();
		out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
		Ok(out)
	}

	async fn delete_participant(&self, conversation: ConversationId, user: &UserId) -> Result<bool, StoreError> {
		let mut inner = self.inner.lock().await;
		Ok(inner.participants.remove(&(conversation, user.clone())).is_some())
	}

	async fn set_participant_last_read(
		&self,
		conversation: ConversationId,
		user: &UserId,
		at: i64,
	) -> Result<bool, StoreError> {
		let mut inner = self.inner.lock().await;
		match inner.participants.get_mut(&(conversation, user.clone())) {
			Some(p) => {
				p.last_read_at = Some(p.last_read_at.map_or(at, |prev| prev.max(at)));
				Ok(true)
			}
			None => Ok(false),
		}
	}

	async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.messages.insert(message.id, message.clone());
		Ok(())
	}

	async fn message(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.messages.get(&id).cloned())
	}

	async fn delete_message(&self, id: MessageId) -> Result<bool, StoreError> {
		let mut inner = self.inner.lock().await;
		Ok(inner.messages.remove(&id).is_some())
	}

	async fn messages_in(&self, conversation: ConversationId, limit: usize) -> Result<Vec<Message>, StoreError> {
		let inner = self.inner.lock().await;
		let mut out: Vec<Message> = inner
			.messages
			.values()
			.filter(|m| m.conversation_id == conversation)
			.cloned()
			.collect();
		out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
		out.truncate(limit);
		Ok(out)
	}

	async fn latest_message_at(&self, conversation: ConversationId) -> Result<Option<i64>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner
			.messages
			.values()
			.filter(|m| m.conversation_id == conversation)
			.map(|m| m.created_at)
			.max())
	}

	async fn count_messages_since(
		&self,
		conversation: ConversationId,
		user: &UserId,
		since: Option<i64>,
	) -> Result<u64, StoreError> {
		let inner = self.inner.lock().await;
		let threshold = since.unwrap_or(i64::MIN);
		Ok(inner
			.messages
			.values()
			.filter(|m| m.conversation_id == conversation && m.user_id != *user && m.created_at > threshold)
			.count() as u64)
	}

	async fn insert_group_membership(&self, membership: &GroupMembership) -> Result<bool, StoreError> {
		let mut inner = self.inner.lock().await;
		let key = (membership.conversation_id, membership.user_id.clone());
		if inner.memberships.contains_key(&key) {
			return Ok(false);
		}
		inner.memberships.insert(key, membership.clone());
		Ok(true)
	}

	async fn group_membership(
		&self,
		conversation: ConversationId,
		user: &UserId,
	) -> Result<Option<GroupMembership>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.memberships.get(&(conversation, user.clone())).cloned())
	}

	async fn group_memberships_of(&self, conversation: ConversationId) -> Result<Vec<GroupMembership>, StoreError> {
		let inner = self.inner.lock().await;
		let mut out: Vec<GroupMembership> = inner
			.memberships
			.values()
			.filter(|m| m.conversation_id == conversation)
			.cloned()
			.collect();
		out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
		Ok(out)
	}

	async fn set_group_role(
		&self,
		conversation: ConversationId,
		user: &UserId,
		role: GroupRole,
	) -> Result<bool, StoreError> {
		let mut inner = self.inner.lock().await;
		match inner.memberships.get_mut(&(conversation, user.clone())) {
			Some(m) => {
				m.role = role;
				Ok(true)
			}
			None => Ok(false),
		}
	}

	async fn delete_group_membership(&self, conversation: ConversationId, user: &UserId) -> Result<bool, StoreError> {
		let mut inner = self.inner.lock().await;
		Ok(inner.memberships.remove(&(conversation, user.clone())).is_some())
	}

	async fn delete_group_memberships(&self, conversation: ConversationId) -> Result<u64, StoreError> {
		let mut inner = self.inner.lock().await;
		let before = inner.memberships.len();
		inner.memberships.retain(|(cid, _), _| *cid != conversation);
		Ok((before - inner.memberships.len()) as u64)
	}

	async fn insert_thread_participant(&self, participant: &ThreadParticipant) -> Result<bool, StoreError> {
		let mut inner = self.inner.lock().await;
		let key = (participant.thread_id, participant.user_id.clone());
		if inner.thread_participants.contains_key(&key) {
			return Ok(false);
		}
		inner.thread_participants.insert(key, participant.clone());
		Ok(true)
	}

	async fn thread_participant(
		&self,
		thread: ConversationId,
		user: &UserId,
	) -> Result<Option<ThreadParticipant>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.thread_participants.get(&(thread, user.clone())).cloned())
	}

	async fn thread_participants_of(&self, thread: ConversationId) -> Result<Vec<ThreadParticipant>, StoreError> {
		let inner = self.inner.lock().await;
		let mut out: Vec<ThreadParticipant> = inner
			.thread_participants
			.values()
			.filter(|t| t.thread_id == thread)
			.cloned()
			.collect();
		out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
		Ok(out)
	}

	async fn set_thread_status(
		&self,
		thread: ConversationId,
		user: &UserId,
		status: ParticipantStatus,
		stamped_at: i64,
	) -> Result<bool, StoreError> {
		let mut inner = self.inner.lock().await;
		match inner.thread_participants.get_mut(&(thread, user.clone())) {
			Some(t) => {
				t.status = status;
				match status {
					ParticipantStatus::Left => t.left_at = Some(stamped_at),
					ParticipantStatus::Archived => t.archived_at = Some(stamped_at),
					ParticipantStatus::Muted => t.muted_at = Some(stamped_at),
					ParticipantStatus::Active => {}
				}
				Ok(true)
			}
			None => Ok(false),
		}
	}

	async fn set_thread_last_read(&self, thread: ConversationId, user: &UserId, at: i64) -> Result<bool, StoreError> {
		let mut inner = self.inner.lock().await;
		match inner.thread_participants.get_mut(&(thread, user.clone())) {
			Some(t) => {
				t.last_read_at = Some(t.last_read_at.map_or(at, |prev| prev.max(at)));
				Ok(true)
			}
			None => Ok(false),
		}
	}

	async fn delete_thread_participants(&self, thread: ConversationId) -> Result<u64, StoreError> {
		let mut inner = self.inner.lock().await;
		let before = inner.thread_participants.len();
		inner.thread_participants.retain(|(tid, _), _| *tid != thread);
		Ok((before - inner.thread_participants.len()) as u64)
	}

	async fn upsert_user(&self, user: &UserRecord) -> Result<(), StoreError> {
		let mut inner = self.inner.lock().await;
		inner.users.insert(user.id.clone(), user.clone());
		Ok(())
	}

	async fn user(&self, id: &UserId) -> Result<Option<UserRecord>, StoreError> {
		let inner = self.inner.lock().await;
		Ok(inner.users.get(id).cloned())
	}

	async fn users_with_capability(&self, capability: &str) -> Result<Vec<UserRecord>, StoreError> {
		let inner = self.inner.lock().await;
		let mut out: Vec<UserRecord> = inner
			.users
			.values()
			.filter(|u| u.has_capability(capability))
			.cloned()
			.collect();
		out.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use pantry_domain::PlatformRole;

	use super::*;

	fn conversation(kind: ConversationKind, room: Option<&str>) -> Conversation {
		Conversation {
			id: ConversationId::new_v4(),
			kind,
			display_name: room.map(str::to_string),
			room: room.map(str::to_string),
			is_active: true,
			created_at: 1,
		}
	}

	#[tokio::test]
	async fn participant_insert_is_idempotent() {
		let store = InMemoryStore::new();
		let conv = conversation(ConversationKind::Group, None);
		store.insert_conversation(&conv).await.unwrap();

		let p = Participant {
			conversation_id: conv.id,
			user_id: UserId::new("u1").unwrap(),
			joined_at: 10,
			last_read_at: None,
		};
		assert!(store.insert_participant(&p).await.unwrap());
		assert!(!store.insert_participant(&p).await.unwrap());
		assert_eq!(store.participants_of(conv.id).await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn last_read_never_decreases() {
		let store = InMemoryStore::new();
		let conv = conversation(ConversationKind::Group, None);
		store.insert_conversation(&conv).await.unwrap();

		let user = UserId::new("u1").unwrap();
		let p = Participant {
			conversation_id: conv.id,
			user_id: user.clone(),
			joined_at: 10,
			last_read_at: None,
		};
		store.insert_participant(&p).await.unwrap();

		assert!(store.set_participant_last_read(conv.id, &user, 100).await.unwrap());
		assert!(store.set_participant_last_read(conv.id, &user, 50).await.unwrap());

		let got = store.participant(conv.id, &user).await.unwrap().unwrap();
		assert_eq!(got.last_read_at, Some(100));
	}

	#[tokio::test]
	async fn messages_scan_orders_ascending_and_caps() {
		let store = InMemoryStore::new();
		let conv = conversation(ConversationKind::Channel, Some("general"));
		store.insert_conversation(&conv).await.unwrap();

		for (i, at) in [30i64, 10, 20].iter().enumerate() {
			let m = Message {
				id: MessageId::new_v4(),
				conversation_id: conv.id,
				user_id: UserId::new(format!("u{i}")).unwrap(),
				content: format!("m{at}"),
				sender_display_name: "U".to_string(),
				created_at: *at,
			};
			store.insert_message(&m).await.unwrap();
		}

		let all = store.messages_in(conv.id, 10).await.unwrap();
		let times: Vec<i64> = all.iter().map(|m| m.created_at).collect();
		assert_eq!(times, vec![10, 20, 30]);

		let capped = store.messages_in(conv.id, 2).await.unwrap();
		assert_eq!(capped.len(), 2);
		assert_eq!(store.latest_message_at(conv.id).await.unwrap(), Some(30));
	}

	#[tokio::test]
	async fn users_with_capability_filters() {
		let store = InMemoryStore::new();
		for (id, caps) in [("u1", vec!["chat_general"]), ("u2", vec!["chat_general", "chat_hosts"])] {
			store
				.upsert_user(&UserRecord {
					id: UserId::new(id).unwrap(),
					display_name: None,
					first_name: None,
					last_name: None,
					email: None,
					role: PlatformRole::Volunteer,
					capabilities: caps.into_iter().map(str::to_string).collect(),
				})
				.await
				.unwrap();
		}

		let hosts = store.users_with_capability("chat_hosts").await.unwrap();
		assert_eq!(hosts.len(), 1);
		assert_eq!(hosts[0].id.as_str(), "u2");
		assert!(store.users_with_capability("chat_drivers").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn upsert_user_overwrites_mirror() {
		let store = InMemoryStore::new();
		let id = UserId::new("u1").unwrap();
		let mut record = UserRecord {
			id: id.clone(),
			display_name: Some("Old Name".to_string()),
			first_name: None,
			last_name: None,
			email: None,
			role: PlatformRole::Volunteer,
			capabilities: vec!["chat_general".to_string()],
		};
		store.upsert_user(&record).await.unwrap();

		record.display_name = Some("New Name".to_string());
		record.role = PlatformRole::Moderator;
		record.capabilities = vec!["chat_hosts".to_string()];
		store.upsert_user(&record).await.unwrap();

		let got = store.user(&id).await.unwrap().unwrap();
		assert_eq!(got.display_name.as_deref(), Some("New Name"));
		assert_eq!(got.role, PlatformRole::Moderator);
		assert!(got.has_capability("chat_hosts"));
		assert!(!got.has_capability("chat_general"));

		assert!(store.user(&UserId::new("u2").unwrap()).await.unwrap().is_none());
	}
}
