#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};
use tracing::warn;

/// One audited mutation of a conversation, membership, or moderation action.
#[derive(Debug, Clone)]
pub struct AuditEvent {
	pub action: String,
	pub entity_type: String,
	pub entity_id: String,
	pub actor_id: String,
	pub before: Option<serde_json::Value>,
	pub after: Option<serde_json::Value>,
}

impl AuditEvent {
	pub fn new(
		action: impl Into<String>,
		entity_type: impl Into<String>,
		entity_id: impl Into<String>,
		actor_id: impl Into<String>,
	) -> Self {
		Self {
			action: action.into(),
			entity_type: entity_type.into(),
			entity_id: entity_id.into(),
			actor_id: actor_id.into(),
			before: None,
			after: None,
		}
	}

	pub fn with_before(mut self, before: serde_json::Value) -> Self {
		self.before = Some(before);
		self
	}

	pub fn with_after(mut self, after: serde_json::Value) -> Self {
		self.after = Some(after);
		self
	}
}

/// Fire-and-forget audit sink.
///
/// Failures here must never reach the caller of the mutating operation.
#[derive(Clone)]
pub struct AuditService {
	pool: Option<sqlx::SqlitePool>,
}

impl AuditService {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if !database_url.starts_with("sqlite:") {
			return Err(anyhow!("unsupported database_url for audit (expected sqlite:)"));
		}

		let pool = sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?;
		Ok(Self { pool: Some(pool) })
	}

	pub fn disabled() -> Self {
		Self { pool: None }
	}

	pub async fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
		let Some(pool) = &self.pool else {
			return Ok(());
		};

		let before = event.before.as_ref().map(serde_json::Value::to_string);
		let after = event.after.as_ref().map(serde_json::Value::to_string);

		sqlx::query(
			"INSERT INTO audit_log (action, entity_type, entity_id, actor_id, before_state, after_state, created_at) \
			VALUES (?, ?, ?, ?, ?, ?, strftime('%s','now'))",
		)
		.bind(&event.action)
		.bind(&event.entity_type)
		.bind(&event.entity_id)
		.bind(&event.actor_id)
		.bind(before)
		.bind(after)
		.execute(pool)
		.await
		.context("insert audit_log")?;

		Ok(())
	}

	/// Record in a detached task; errors are logged, never propagated.
	pub fn record_detached(&self, event: AuditEvent) {
		let sink = self.clone();
		tokio::spawn(async move {
			if let Err(e) = sink.record(&event).await {
				warn!(action = %event.action, entity_type = %event.entity_type, error = %e, "audit record failed");
			}
		});
	}
}
