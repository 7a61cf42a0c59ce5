#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use pantry_domain::UserId;
use pantry_protocol::ServerFrame;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Server-assigned id for one live connection.
pub type ConnectionId = u64;

/// Concurrency-safe map from user to their live connection senders.
///
/// Holds its own mutex, never shared with persistence. A user may hold any
/// number of simultaneous connections; fan-out targets every one of them.
#[derive(Debug, Clone)]
pub struct PresenceRegistry {
	inner: Arc<Mutex<Inner>>,
	cfg: PresenceConfig,
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
	pub debug_logs: bool,
}

impl Default for PresenceConfig {
	fn default() -> Self {
		Self { debug_logs: false }
	}
}

#[derive(Debug, Default)]
struct Inner {
	by_user: HashMap<UserId, Vec<ConnectionHandle>>,
	user_by_conn: HashMap<ConnectionId, UserId>,
}

#[derive(Debug)]
struct ConnectionHandle {
	conn_id: ConnectionId,
	sender: mpsc::Sender<ServerFrame>,
}

impl PresenceRegistry {
	pub fn new(cfg: PresenceConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Register a live connection for `user`.
	pub async fn register(&self, user: UserId, conn_id: ConnectionId, sender: mpsc::Sender<ServerFrame>) {
		let mut inner = self.inner.lock().await;

		let entry = inner.by_user.entry(user.clone()).or_default();
		prune_closed_handles(entry);
		entry.push(ConnectionHandle { conn_id, sender });

		inner.user_by_conn.insert(conn_id, user.clone());

		if self.cfg.debug_logs {
			debug!(user = %user, conn_id, "presence: registered");
		}

		update_gauges(&inner);
	}

	/// Remove one connection; the reverse index finds its owner.
	pub async fn unregister(&self, conn_id: ConnectionId) {
		let mut inner = self.inner.lock().await;

		let Some(user) = inner.user_by_conn.remove(&conn_id) else {
			return;
		};

		if let Some(entry) = inner.by_user.get_mut(&user) {
			entry.retain(|h| h.conn_id != conn_id);
			if entry.is_empty() {
				inner.by_user.remove(&user);
			}
		}

		if self.cfg.debug_logs {
			debug!(user = %user, conn_id, "presence: unregistered");
		}

		update_gauges(&inner);
	}

	/// Snapshot of live senders for `user`, pruning closed ones.
	pub async fn senders_for(&self, user: &UserId) -> Vec<mpsc::Sender<ServerFrame>> {
		let mut inner = self.inner.lock().await;
		let Some(entry) = inner.by_user.get_mut(user) else {
			return Vec::new();
		};

		let closed: Vec<ConnectionId> = entry
			.iter()
			.filter(|h| h.sender.is_closed())
			.map(|h| h.conn_id)
			.collect();
		prune_closed_handles(entry);

		let senders: Vec<_> = entry.iter().map(|h| h.sender.clone()).collect();
		if entry.is_empty() {
			inner.by_user.remove(user);
		}
		for conn_id in closed {
			inner.user_by_conn.remove(&conn_id);
		}

		update_gauges(&inner);
		senders
	}

	/// Number of distinct users with at least one live connection.
	pub async fn connected_user_count(&self) -> usize {
		let inner = self.inner.lock().await;
		inner.by_user.len()
	}

	pub async fn connection_count(&self) -> usize {
		let inner = self.inner.lock().await;
		inner.user_by_conn.len()
	}
}

fn prune_closed_handles(entry: &mut Vec<ConnectionHandle>) {
	entry.retain(|h| !h.sender.is_closed());
}

fn update_gauges(inner: &Inner) {
	metrics::gauge!("pantry_chat_connected_users").set(inner.by_user.len() as f64);
	metrics::gauge!("pantry_chat_live_connections").set(inner.user_by_conn.len() as f64);
}
