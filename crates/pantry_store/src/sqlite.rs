#![forbid(unsafe_code)]

use core::str::FromStr;

use anyhow::Context as _;
use pantry_domain::{
	Conversation, ConversationId, ConversationKind, GroupMembership, GroupRole, Message, MessageId, Participant,
	ParticipantStatus, PlatformRole, ThreadParticipant, UserId,
};

use crate::error::StoreError;
use crate::store::{EntityStore, UserRecord};

/// SQLite-backed entity store.
#[derive(Clone)]
pub struct SqliteStore {
	pool: sqlx::SqlitePool,
}

impl SqliteStore {
	/// Connect and run embedded migrations.
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if !database_url.starts_with("sqlite:") {
			return Err(anyhow::anyhow!("unsupported database_url (expected sqlite:)"));
		}

		let pool = sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?;
		sqlx::migrate!("./migrations").run(&pool).await.context("run migrations")?;
		Ok(Self { pool })
	}
}

fn parse_uuid(s: &str) -> Result<uuid::Uuid, StoreError> {
	uuid::Uuid::parse_str(s).map_err(|e| StoreError::Decode(format!("invalid uuid {s:?}: {e}")))
}

fn parse_user_id(s: &str) -> Result<UserId, StoreError> {
	UserId::new(s).map_err(|e| StoreError::Decode(format!("invalid user id {s:?}: {e}")))
}

type ConversationRow = (String, String, Option<String>, Option<String>, i64, i64);

fn conversation_from_row(row: ConversationRow) -> Result<Conversation, StoreError> {
	let (id, kind, display_name, room, is_active, created_at) = row;
	Ok(Conversation {
		id: ConversationId(parse_uuid(&id)?),
		kind: ConversationKind::from_str(&kind).map_err(|e| StoreError::Decode(e.to_string()))?,
		display_name,
		room,
		is_active: is_active != 0,
		created_at,
	})
}

type MessageRow = (String, String, String, String, String, i64);

fn message_from_row(row: MessageRow) -> Result<Message, StoreError> {
	let (id, conversation_id, user_id, content, sender_display_name, created_at) = row;
	Ok(Message {
		id: MessageId(parse_uuid(&id)?),
		conversation_id: ConversationId(parse_uuid(&conversation_id)?),
		user_id: parse_user_id(&user_id)?,
		content,
		sender_display_name,
		created_at,
	})
}

type ThreadParticipantRow = (String, String, i64, Option<i64>, Option<i64>, Option<i64>, Option<i64>);

fn thread_participant_from_row(thread: ConversationId, row: ThreadParticipantRow) -> Result<ThreadParticipant, StoreError> {
	let (user_id, status, joined_at, last_read_at, left_at, archived_at, muted_at) = row;
	Ok(ThreadParticipant {
		thread_id: thread,
		user_id: parse_user_id(&user_id)?,
		status: ParticipantStatus::from_str(&status).map_err(|e| StoreError::Decode(e.to_string()))?,
		joined_at,
		last_read_at,
		left_at,
		archived_at,
		muted_at,
	})
}

type UserRow = (String, Option<String>, Option<String>, Option<String>, Option<String>, String, String);

fn user_from_row(row: UserRow) -> Result<UserRecord, StoreError> {
	let (id, display_name, first_name, last_name, email, role, capabilities) = row;
	let capabilities: Vec<String> =
		serde_json::from_str(&capabilities).map_err(|e| StoreError::Decode(format!("user capabilities: {e}")))?;
	Ok(UserRecord {
		id: parse_user_id(&id)?,
		display_name,
		first_name,
		last_name,
		email,
		role: PlatformRole::from_str(&role).map_err(|e| StoreError::Decode(e.to_string()))?,
		capabilities,
	})
}

const CONVERSATION_COLS: &str = "id, kind, display_name, room, is_active, created_at";
const MESSAGE_COLS: &str = "id, conversation_id, user_id, content, sender_display_name, created_at";
const THREAD_COLS: &str = "user_id, status, joined_at, last_read_at, left_at, archived_at, muted_at";
const USER_COLS: &str = "id, display_name, first_name, last_name, email, role, capabilities";

#[async_trait::async_trait]
impl EntityStore for SqliteStore {
	async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
		sqlx::query(
			"INSERT INTO conversations (id, kind, display_name, room, is_active, created_at) VALUES (?, ?, ?, ?, ?, ?)",
		)
		.bind(conversation.id.to_string())
		.bind(conversation.kind.as_str())
		.bind(conversation.display_name.as_deref())
		.bind(conversation.room.as_deref())
		.bind(conversation.is_active as i64)
		.bind(conversation.created_at)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError> {
		let row: Option<ConversationRow> =
			sqlx::query_as(&format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?"))
				.bind(id.to_string())
				.fetch_optional(&self.pool)
				.await?;
		row.map(conversation_from_row).transpose()
	}

	async fn channel_conversation_by_room(&self, room: &str) -> Result<Option<Conversation>, StoreError> {
		let row: Option<ConversationRow> = sqlx::query_as(&format!(
			"SELECT {CONVERSATION_COLS} FROM conversations WHERE kind = 'channel' AND room = ?"
		))
		.bind(room)
		.fetch_optional(&self.pool)
		.await?;
		row.map(conversation_from_row).transpose()
	}

	async fn channel_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
		let rows: Vec<ConversationRow> = sqlx::query_as(&format!(
			"SELECT {CONVERSATION_COLS} FROM conversations WHERE kind = 'channel' AND is_active = 1 ORDER BY created_at ASC"
		))
		.fetch_all(&self.pool)
		.await?;
		rows.into_iter().map(conversation_from_row).collect()
	}

	async fn conversations_with_participant(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError> {
		let rows: Vec<ConversationRow> = sqlx::query_as(&format!(
			"SELECT c.id, c.kind, c.display_name, c.room, c.is_active, c.created_at \
			FROM conversations c \
			JOIN conversation_participants p ON p.conversation_id = c.id \
			WHERE p.user_id = ? AND c.is_active = 1 \
			ORDER BY c.created_at ASC"
		))
		.bind(user.as_str())
		.fetch_all(&self.pool)
		.await?;
		rows.into_iter().map(conversation_from_row).collect()
	}

	async fn rename_conversation(&self, id: ConversationId, display_name: &str) -> Result<bool, StoreError> {
		let res = sqlx::query("UPDATE conversations SET display_name = ? WHERE id = ?")
			.bind(display_name)
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(res.rows_affected() > 0)
	}

	async fn set_conversation_active(&self, id: ConversationId, active: bool) -> Result<bool, StoreError> {
		let res = sqlx::query("UPDATE conversations SET is_active = ? WHERE id = ?")
			.bind(active as i64)
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(res.rows_affected() > 0)
	}

	async fn insert_participant(&self, participant: &Participant) -> Result<bool, StoreError> {
		let res = sqlx::query(
			"INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id, joined_at, last_read_at) \
			VALUES (?, ?, ?, ?)",
		)
		.bind(participant.conversation_id.to_string())
		.bind(participant.user_id.as_str())
		.bind(participant.joined_at)
		.bind(participant.last_read_at)
		.execute(&self.pool)
		.await?;
		Ok(res.rows_affected() > 0)
	}

	async fn participant(&self, conversation: ConversationId, user: &UserId) -> Result<Option<Participant>, StoreError> {
		let row: Option<(i64, Option<i64>)> = sqlx::query_as(
			"SELECT joined_at, last_read_at FROM conversation_participants WHERE conversation_id = ? AND user_id = ?",
		)
		.bind(conversation.to_string())
		.bind(user.as_str())
		.fetch_optional(&self.pool)
		.await?;
		Ok(row.map(|(joined_at, last_read_at)| Participant {
			conversation_id: conversation,
			user_id: user.clone(),
			joined_at,
			last_read_at,
		}))
	}

	async fn participants_of(&self, conversation: ConversationId) -> Result<Vec<Participant>, StoreError> {
		let rows: Vec<(String, i64, Option<i64>)> = sqlx::query_as(
			"SELECT user_id, joined_at, last_read_at FROM conversation_participants \
			WHERE conversation_id = ? ORDER BY user_id ASC",
		)
		.bind(conversation.to_string())
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter()
			.map(|(user_id, joined_at, last_read_at)| {
				Ok(Participant {
					conversation_id: conversation,
					user_id: parse_user_id(&user_id)?,
					joined_at,
					last_read_at,
				})
			})
			.collect()
	}

	async fn delete_participant(&self, conversation: ConversationId, user: &UserId) -> Result<bool, StoreError> {
		let res = sqlx::query("DELETE FROM conversation_participants WHERE conversation_id = ? AND user_id = ?")
			.bind(conversation.to_string())
			.bind(user.as_str())
			.execute(&self.pool)
			.await?;
		Ok(res.rows_affected() > 0)
	}

	async fn set_participant_last_read(
		&self,
		conversation: ConversationId,
		user: &UserId,
		at: i64,
	) -> Result<bool, StoreError> {
		let res = sqlx::query(
			"UPDATE conversation_participants SET last_read_at = MAX(COALESCE(last_read_at, 0), ?) \
			WHERE conversation_id = ? AND user_id = ?",
		)
		.bind(at)
		.bind(conversation.to_string())
		.bind(user.as_str())
		.execute(&self.pool)
		.await?;
		Ok(res.rows_affected() > 0)
	}

	async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
		sqlx::query(
			"INSERT INTO messages (id, conversation_id, user_id, content, sender_display_name, created_at) \
			VALUES (?, ?, ?, ?, ?, ?)",
		)
		.bind(message.id.to_string())
		.bind(message.conversation_id.to_string())
		.bind(message.user_id.as_str())
		.bind(&message.content)
		.bind(&message.sender_display_name)
		.bind(message.created_at)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn message(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
		let row: Option<MessageRow> = sqlx::query_as(&format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?"))
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?;
		row.map(message_from_row).transpose()
	}

	async fn delete_message(&self, id: MessageId) -> Result<bool, StoreError> {
		let res = sqlx::query("DELETE FROM messages WHERE id = ?")
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(res.rows_affected() > 0)
	}

	async fn messages_in(&self, conversation: ConversationId, limit: usize) -> Result<Vec<Message>, StoreError> {
		let rows: Vec<MessageRow> = sqlx::query_as(&format!(
			"SELECT {MESSAGE_COLS} FROM messages WHERE conversation_id = ? ORDER BY created_at ASC, id ASC LIMIT ?"
		))
		.bind(conversation.to_string())
		.bind(limit as i64)
		.fetch_all(&self.pool)
		.await?;
		rows.into_iter().map(message_from_row).collect()
	}

	async fn latest_message_at(&self, conversation: ConversationId) -> Result<Option<i64>, StoreError> {
		let row: Option<(Option<i64>,)> = sqlx::query_as("SELECT MAX(created_at) FROM messages WHERE conversation_id = ?")
			.bind(conversation.to_string())
			.fetch_optional(&self.pool)
			.await?;
		Ok(row.and_then(|(at,)| at))
	}

	async fn count_messages_since(
		&self,
		conversation: ConversationId,
		user: &UserId,
		since: Option<i64>,
	) -> Result<u64, StoreError> {
		let row: (i64,) = sqlx::query_as(
			"SELECT COUNT(*) FROM messages WHERE conversation_id = ? AND user_id != ? AND created_at > ?",
		)
		.bind(conversation.to_string())
		.bind(user.as_str())
		.bind(since.unwrap_or(i64::MIN))
		.fetch_one(&self.pool)
		.await?;
		Ok(row.0 as u64)
	}

	async fn insert_group_membership(&self, membership: &GroupMembership) -> Result<bool, StoreError> {
		let res = sqlx::query("INSERT OR IGNORE INTO group_memberships (conversation_id, user_id, role) VALUES (?, ?, ?)")
			.bind(membership.conversation_id.to_string())
			.bind(membership.user_id.as_str())
			.bind(membership.role.as_str())
			.execute(&self.pool)
			.await?;
		Ok(res.rows_affected() > 0)
	}

	async fn group_membership(
		&self,
		conversation: ConversationId,
		user: &UserId,
	) -> Result<Option<GroupMembership>, StoreError> {
		let row: Option<(String,)> =
			sqlx::query_as("SELECT role FROM group_memberships WHERE conversation_id = ? AND user_id = ?")
				.bind(conversation.to_string())
				.bind(user.as_str())
				.fetch_optional(&self.pool)
				.await?;

		row.map(|(role,)| {
			Ok(GroupMembership {
				conversation_id: conversation,
				user_id: user.clone(),
				role: GroupRole::from_str(&role).map_err(|e| StoreError::Decode(e.to_string()))?,
			})
		})
		.transpose()
	}

	async fn group_memberships_of(&self, conversation: ConversationId) -> Result<Vec<GroupMembership>, StoreError> {
		let rows: Vec<(String, String)> =
			sqlx::query_as("SELECT user_id, role FROM group_memberships WHERE conversation_id = ? ORDER BY user_id ASC")
				.bind(conversation.to_string())
				.fetch_all(&self.pool)
				.await?;

		rows.into_iter()
			.map(|(user_id, role)| {
				Ok(GroupMembership {
					conversation_id: conversation,
					user_id: parse_user_id(&user_id)?,
					role: GroupRole::from_str(&role).map_err(|e| StoreError::Decode(e.to_string()))?,
				})
			})
			.collect()
	}

	async fn set_group_role(
		&self,
		conversation: ConversationId,
		user: &UserId,
		role: GroupRole,
	) -> Result<bool, StoreError> {
		let res = sqlx::query("UPDATE group_memberships SET role = ? WHERE conversation_id = ? AND user_id = ?")
			.bind(role.as_str())
			.bind(conversation.to_string())
			.bind(user.as_str())
			.execute(&self.pool)
			.await?;
		Ok(res.rows_affected() > 0)
	}

	async fn delete_group_membership(&self, conversation: ConversationId, user: &UserId) -> Result<bool, StoreError> {
		let res = sqlx::query("DELETE FROM group_memberships WHERE conversation_id = ? AND user_id = ?")
			.bind(conversation.to_string())
			.bind(user.as_str())
			.execute(&self.pool)
			.await?;
		Ok(res.rows_affected() > 0)
	}

	async fn delete_group_memberships(&self, conversation: ConversationId) -> Result<u64, StoreError> {
		let res = sqlx::query("DELETE FROM group_memberships WHERE conversation_id = ?")
			.bind(conversation.to_string())
			.execute(&self.pool)
			.await?;
		Ok(res.rows_affected())
	}

	async fn insert_thread_participant(&self, participant: &ThreadParticipant) -> Result<bool, StoreError> {
		let res = sqlx::query(
			"INSERT OR IGNORE INTO thread_participants \
			(thread_id, user_id, status, joined_at, last_read_at, left_at, archived_at, muted_at) \
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(participant.thread_id.to_string())
		.bind(participant.user_id.as_str())
		.bind(participant.status.as_str())
		.bind(participant.joined_at)
		.bind(participant.last_read_at)
		.bind(participant.left_at)
		.bind(participant.archived_at)
		.bind(participant.muted_at)
		.execute(&self.pool)
		.await?;
		Ok(res.rows_affected() > 0)
	}

	async fn thread_participant(
		&self,
		thread: ConversationId,
		user: &UserId,
	) -> Result<Option<ThreadParticipant>, StoreError> {
		let row: Option<ThreadParticipantRow> = sqlx::query_as(&format!(
			"SELECT {THREAD_COLS} FROM thread_participants WHERE thread_id = ? AND user_id = ?"
		))
		.bind(thread.to_string())
		.bind(user.as_str())
		.fetch_optional(&self.pool)
		.await?;
		row.map(|r| thread_participant_from_row(thread, r)).transpose()
	}

	async fn thread_participants_of(&self, thread: ConversationId) -> Result<Vec<ThreadParticipant>, StoreError> {
		let rows: Vec<ThreadParticipantRow> = sqlx::query_as(&format!(
			"SELECT {THREAD_COLS} FROM thread_participants WHERE thread_id = ? ORDER BY user_id ASC"
		))
		.bind(thread.to_string())
		.fetch_all(&self.pool)
		.await?;
		rows.into_iter().map(|r| thread_participant_from_row(thread, r)).collect()
	}

	async fn set_thread_status(
		&self,
		thread: ConversationId,
		user: &UserId,
		status: ParticipantStatus,
		stamped_at: i64,
	) -> Result<bool, StoreError> {
		let res = match status {
			ParticipantStatus::Active => {
				sqlx::query("UPDATE thread_participants SET status = ? WHERE thread_id = ? AND user_id = ?")
					.bind(status.as_str())
					.bind(thread.to_string())
					.bind(user.as_str())
					.execute(&self.pool)
					.await?
			}
			ParticipantStatus::Left => {
				sqlx::query("UPDATE thread_participants SET status = ?, left_at = ? WHERE thread_id = ? AND user_id = ?")
					.bind(status.as_str())
					.bind(stamped_at)
					.bind(thread.to_string())
					.bind(user.as_str())
					.execute(&self.pool)
					.await?
			}
			ParticipantStatus::Archived => {
				sqlx::query("UPDATE thread_participants SET status = ?, archived_at = ? WHERE thread_id = ? AND user_id = ?")
					.bind(status.as_str())
					.bind(stamped_at)
					.bind(thread.to_string())
					.bind(user.as_str())
					.execute(&self.pool)
					.await?
			}
			ParticipantStatus::Muted => {
				sqlx::query("UPDATE thread_participants SET status = ?, muted_at = ? WHERE thread_id = ? AND user_id = ?")
					.bind(status.as_str())
					.bind(stamped_at)
					.bind(thread.to_string())
					.bind(user.as_str())
					.execute(&self.pool)
					.await?
			}
		};
		Ok(res.rows_affected() > 0)
	}

	async fn set_thread_last_read(&self, thread: ConversationId, user: &UserId, at: i64) -> Result<bool, StoreError> {
		let res = sqlx::query(
			"UPDATE thread_participants SET last_read_at = MAX(COALESCE(last_read_at, 0), ?) \
			WHERE thread_id = ? AND user_id = ?",
		)
		.bind(at)
		.bind(thread.to_string())
		.bind(user.as_str())
		.execute(&self.pool)
		.await?;
		Ok(res.rows_affected() > 0)
	}

	async fn delete_thread_participants(&self, thread: ConversationId) -> Result<u64, StoreError> {
		let res = sqlx::query("DELETE FROM thread_participants WHERE thread_id = ?")
			.bind(thread.to_string())
			.execute(&self.pool)
			.await?;
		Ok(res.rows_affected())
	}

	async fn upsert_user(&self, user: &UserRecord) -> Result<(), StoreError> {
		let capabilities = serde_json::to_string(&user.capabilities)
			.map_err(|e| StoreError::Decode(format!("user capabilities: {e}")))?;
		sqlx::query(
			"INSERT INTO users (id, display_name, first_name, last_name, email, role, capabilities) \
			VALUES (?, ?, ?, ?, ?, ?, ?) \
			ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, first_name = excluded.first_name, \
			last_name = excluded.last_name, email = excluded.email, role = excluded.role, \
			capabilities = excluded.capabilities",
		)
		.bind(user.id.as_str())
		.bind(user.display_name.as_deref())
		.bind(user.first_name.as_deref())
		.bind(user.last_name.as_deref())
		.bind(user.email.as_deref())
		.bind(user.role.as_str())
		.bind(capabilities)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn user(&self, id: &UserId) -> Result<Option<UserRecord>, StoreError> {
		let row: Option<UserRow> = sqlx::query_as(&format!("SELECT {USER_COLS} FROM users WHERE id = ?"))
			.bind(id.as_str())
			.fetch_optional(&self.pool)
			.await?;
		row.map(user_from_row).transpose()
	}

	async fn users_with_capability(&self, capability: &str) -> Result<Vec<UserRecord>, StoreError> {
		// Capability sets are small JSON arrays; filter in process.
		let rows: Vec<UserRow> = sqlx::query_as(&format!("SELECT {USER_COLS} FROM users ORDER BY id ASC"))
			.fetch_all(&self.pool)
			.await?;

		let mut out = Vec::new();
		for row in rows {
			let user = user_from_row(row)?;
			if user.has_capability(capability) {
				out.push(user);
			}
		}
		Ok(out)
	}
}
