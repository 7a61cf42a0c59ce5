#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use pantry_domain::{AuthUser, PlatformRole, UserId};
use pantry_store::{AuditService, EntityStore, InMemoryStore, UserRecord};

use crate::broadcast::NotificationBroadcaster;
use crate::conversations::ConversationService;
use crate::messages::MessageService;
use crate::permissions::PermissionResolver;
use crate::presence::{PresenceConfig, PresenceRegistry};
use crate::threads::ThreadStateService;

/// Fully wired service stack over an in-memory store.
pub(crate) struct Fixture {
	pub store: Arc<dyn EntityStore>,
	pub conversations: ConversationService,
	pub threads: ThreadStateService,
	pub messages: MessageService,
	pub presence: PresenceRegistry,
	pub broadcaster: NotificationBroadcaster,
}

pub(crate) fn fixture() -> Fixture {
	let store: Arc<dyn EntityStore> = Arc::new(InMemoryStore::new());
	let permissions = Arc::new(PermissionResolver::with_defaults());
	let presence = PresenceRegistry::new(PresenceConfig::default());
	let broadcaster = NotificationBroadcaster::new(store.clone(), presence.clone(), permissions.clone());
	let audit = AuditService::disabled();

	Fixture {
		conversations: ConversationService::new(store.clone(), audit.clone()),
		threads: ThreadStateService::new(store.clone()),
		messages: MessageService::new(store.clone(), permissions, broadcaster.clone(), audit),
		presence,
		broadcaster,
		store,
	}
}

pub(crate) fn uid(s: &str) -> UserId {
	UserId::new(s).expect("test user id")
}

pub(crate) fn volunteer(id: &str, capabilities: &[&str]) -> AuthUser {
	AuthUser {
		user_id: uid(id),
		role: PlatformRole::Volunteer,
		capabilities: capabilities.iter().map(|c| c.to_string()).collect::<BTreeSet<_>>(),
		display_name: Some(format!("User {id}")),
		first_name: None,
		last_name: None,
		email: None,
	}
}

pub(crate) fn platform_admin(id: &str) -> AuthUser {
	let mut user = volunteer(id, &[]);
	user.role = PlatformRole::Admin;
	user
}

/// Seed the users table so channel fan-out audiences can be computed.
pub(crate) async fn seed_user(store: &Arc<dyn EntityStore>, user: &AuthUser) {
	store
		.upsert_user(&UserRecord {
			id: user.user_id.clone(),
			display_name: user.display_name.clone(),
			first_name: user.first_name.clone(),
			last_name: user.last_name.clone(),
			email: user.email.clone(),
			role: user.role,
			capabilities: user.capabilities.iter().cloned().collect(),
		})
		.await
		.expect("seed user");
}
