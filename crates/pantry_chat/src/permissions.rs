#![forbid(unsafe_code)]

use std::collections::HashMap;

use pantry_domain::AuthUser;
use tracing::debug;

/// Data-driven map from symbolic room name to the capability that gates it.
///
/// Unknown rooms fail closed.
#[derive(Debug, Clone)]
pub struct PermissionResolver {
	capability_by_room: HashMap<String, String>,
}

impl PermissionResolver {
	/// Resolver with the built-in room map.
	pub fn with_defaults() -> Self {
		let mut capability_by_room = HashMap::new();
		for (room, capability) in [
			("general", "chat_general"),
			("hosts", "chat_hosts"),
			("drivers", "chat_drivers"),
			("core_team", "chat_core_team"),
			("direct", "chat_direct"),
			("groups", "chat_groups"),
		] {
			capability_by_room.insert(room.to_string(), capability.to_string());
		}
		Self { capability_by_room }
	}

	/// Defaults plus config-provided overrides (new rooms or remapped ones).
	pub fn with_overrides<'a, I>(overrides: I) -> Self
	where
		I: IntoIterator<Item = (&'a String, &'a String)>,
	{
		let mut resolver = Self::with_defaults();
		for (room, capability) in overrides {
			let room = room.trim();
			let capability = capability.trim();
			if room.is_empty() || capability.is_empty() {
				continue;
			}
			resolver
				.capability_by_room
				.insert(room.to_string(), capability.to_string());
		}
		resolver
	}

	/// The capability gating `room`, if the room is known.
	pub fn capability_for(&self, room: &str) -> Option<&str> {
		self.capability_by_room.get(room).map(String::as_str)
	}

	/// Whether `user` may read/post in `room`. Platform admins pass any
	/// known room; unknown rooms deny everyone.
	pub fn can_access(&self, user: &AuthUser, room: &str) -> bool {
		let Some(capability) = self.capability_for(room) else {
			debug!(room, user = %user.user_id, "permission check for unknown room");
			return false;
		};

		if user.is_platform_admin() {
			return true;
		}

		let allowed = user.has_capability(capability);
		if !allowed {
			debug!(room, capability, user = %user.user_id, "room access denied");
		}
		allowed
	}

	pub fn known_rooms(&self) -> impl Iterator<Item = &str> {
		self.capability_by_room.keys().map(String::as_str)
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use pantry_domain::{PlatformRole, UserId};

	use super::*;

	fn volunteer(capabilities: &[&str]) -> AuthUser {
		AuthUser {
			user_id: UserId::new("u1").unwrap(),
			role: PlatformRole::Volunteer,
			capabilities: capabilities.iter().map(|c| c.to_string()).collect::<BTreeSet<_>>(),
			display_name: None,
			first_name: None,
			last_name: None,
			email: None,
		}
	}

	#[test]
	fn capability_gates_known_rooms() {
		let resolver = PermissionResolver::with_defaults();
		let user = volunteer(&["chat_hosts"]);

		assert!(resolver.can_access(&user, "hosts"));
		assert!(!resolver.can_access(&user, "drivers"));
	}

	#[test]
	fn unknown_rooms_fail_closed_even_for_admins() {
		let resolver = PermissionResolver::with_defaults();
		let mut admin = volunteer(&[]);
		admin.role = PlatformRole::Admin;

		assert!(resolver.can_access(&admin, "general"));
		assert!(!resolver.can_access(&admin, "secret_lair"));
	}

	#[test]
	fn overrides_extend_and_remap() {
		let mut overrides = HashMap::new();
		overrides.insert("board".to_string(), "chat_board".to_string());
		overrides.insert("general".to_string(), "chat_everyone".to_string());
		overrides.insert("  ".to_string(), "chat_blank".to_string());

		let resolver = PermissionResolver::with_overrides(&overrides);
		assert_eq!(resolver.capability_for("board"), Some("chat_board"));
		assert_eq!(resolver.capability_for("general"), Some("chat_everyone"));
		assert_eq!(resolver.capability_for("hosts"), Some("chat_hosts"));
	}
}
