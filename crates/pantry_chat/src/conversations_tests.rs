#![forbid(unsafe_code)]

use pantry_domain::{ConversationKind, GroupRole, Message, MessageId, ParticipantStatus};

use crate::error::ChatError;
use crate::testkit::{fixture, platform_admin, uid, volunteer};

#[tokio::test]
async fn direct_creation_is_idempotent_across_argument_order() {
	let fx = fixture();
	let ann = volunteer("ann", &[]);
	let bob = volunteer("bob", &[]);

	let first = fx.conversations.create_direct(&ann, &bob.user_id).await.expect("create");
	let second = fx.conversations.create_direct(&bob, &ann.user_id).await.expect("reuse");

	assert_eq!(first.id, second.id);
	assert_eq!(first.kind, ConversationKind::Direct);
	assert_eq!(fx.store.participants_of(first.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn direct_creation_rejects_self() {
	let fx = fixture();
	let ann = volunteer("ann", &[]);

	let err = fx.conversations.create_direct(&ann, &ann.user_id).await.unwrap_err();
	assert!(matches!(err, ChatError::Validation { field: "user", .. }));
}

#[tokio::test]
async fn group_creation_assigns_roles_and_thread_rows() {
	let fx = fixture();
	let creator = volunteer("ann", &[]);
	let members = [uid("bob"), uid("cleo")];

	let group = fx
		.conversations
		.create_group(&creator, "Thursday Pickup", &members)
		.await
		.expect("create group");

	let creator_role = fx
		.store
		.group_membership(group.id, &creator.user_id)
		.await
		.unwrap()
		.expect("creator membership");
	assert_eq!(creator_role.role, GroupRole::Admin);

	for member in &members {
		let membership = fx.store.group_membership(group.id, member).await.unwrap().expect("membership");
		assert_eq!(membership.role, GroupRole::Member);

		let thread = fx.store.thread_participant(group.id, member).await.unwrap().expect("thread row");
		assert_eq!(thread.status, ParticipantStatus::Active);
	}

	assert_eq!(fx.store.participants_of(group.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn group_creation_rejects_blank_name() {
	let fx = fixture();
	let creator = volunteer("ann", &[]);

	let err = fx.conversations.create_group(&creator, "   ", &[]).await.unwrap_err();
	assert!(matches!(err, ChatError::Validation { field: "display_name", .. }));
}

#[tokio::test]
async fn add_members_skips_present_and_reports_added() {
	let fx = fixture();
	let creator = volunteer("ann", &[]);
	let group = fx
		.conversations
		.create_group(&creator, "Drivers", &[uid("bob")])
		.await
		.expect("create group");

	let added = fx
		.conversations
		.add_members(group.id, &[uid("bob"), uid("cleo")], &creator)
		.await
		.expect("add");
	assert_eq!(added, 1);

	let added_again = fx
		.conversations
		.add_members(group.id, &[uid("bob"), uid("cleo")], &creator)
		.await
		.expect("duplicate add is not an error");
	assert_eq!(added_again, 0);

	assert_eq!(fx.store.participants_of(group.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn concurrent_duplicate_add_yields_single_row() {
	let fx = fixture();
	let creator = volunteer("ann", &[]);
	let group = fx.conversations.create_group(&creator, "Drivers", &[]).await.expect("create");

	let dana = [uid("dana")];
	let (a, b) = tokio::join!(
		fx.conversations.add_members(group.id, &dana, &creator),
		fx.conversations.add_members(group.id, &dana, &creator),
	);
	let total = a.expect("first call") + b.expect("second call");

	assert_eq!(total, 1);
	let rows: Vec<_> = fx
		.store
		.participants_of(group.id)
		.await
		.unwrap()
		.into_iter()
		.filter(|p| p.user_id == uid("dana"))
		.collect();
	assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn add_members_requires_membership_or_platform_role() {
	let fx = fixture();
	let creator = volunteer("ann", &[]);
	let outsider = volunteer("zed", &[]);
	let group = fx.conversations.create_group(&creator, "Drivers", &[]).await.expect("create");

	let err = fx
		.conversations
		.add_members(group.id, &[uid("bob")], &outsider)
		.await
		.unwrap_err();
	assert!(matches!(err, ChatError::Forbidden));

	let admin = platform_admin("root");
	let added = fx
		.conversations
		.add_members(group.id, &[uid("bob")], &admin)
		.await
		.expect("platform admin may add");
	assert_eq!(added, 1);
}

#[tokio::test]
async fn readding_a_left_member_reactivates_the_thread_row() {
	let fx = fixture();
	let creator = volunteer("ann", &[]);
	let bob = volunteer("bob", &[]);
	let group = fx
		.conversations
		.create_group(&creator, "Drivers", &[bob.user_id.clone()])
		.await
		.expect("create");

	fx.threads
		.set_status(group.id, &bob.user_id, ParticipantStatus::Left)
		.await
		.expect("leave");
	assert!(!fx.threads.visible_to(group.id, &bob.user_id).await.unwrap());

	let added = fx
		.conversations
		.add_members(group.id, &[bob.user_id.clone()], &creator)
		.await
		.expect("re-add");
	assert_eq!(added, 1);

	let row = fx
		.store
		.thread_participant(group.id, &bob.user_id)
		.await
		.unwrap()
		.expect("thread row");
	assert_eq!(row.status, ParticipantStatus::Active);
}

#[tokio::test]
async fn remove_member_permissions() {
	let fx = fixture();
	let creator = volunteer("ann", &[]);
	let bob = volunteer("bob", &[]);
	let cleo = volunteer("cleo", &[]);
	let group = fx
		.conversations
		.create_group(&creator, "Drivers", &[bob.user_id.clone(), cleo.user_id.clone()])
		.await
		.expect("create");

	// A plain member cannot remove someone else.
	let err = fx
		.conversations
		.remove_member(group.id, &cleo.user_id, &bob)
		.await
		.unwrap_err();
	assert!(matches!(err, ChatError::Forbidden));

	// Self-leave is always allowed; history-facing rows flip to left.
	fx.conversations
		.remove_member(group.id, &bob.user_id, &bob)
		.await
		.expect("self leave");
	assert!(fx.store.participant(group.id, &bob.user_id).await.unwrap().is_none());
	let row = fx
		.store
		.thread_participant(group.id, &bob.user_id)
		.await
		.unwrap()
		.expect("thread row survives");
	assert_eq!(row.status, ParticipantStatus::Left);

	// Group admin may remove members.
	fx.conversations
		.remove_member(group.id, &cleo.user_id, &creator)
		.await
		.expect("admin removal");
}

#[tokio::test]
async fn change_member_role_requires_an_admin() {
	let fx = fixture();
	let creator = volunteer("ann", &[]);
	let bob = volunteer("bob", &[]);
	let group = fx
		.conversations
		.create_group(&creator, "Drivers", &[bob.user_id.clone()])
		.await
		.expect("create");

	let err = fx
		.conversations
		.change_member_role(group.id, &bob.user_id, GroupRole::Admin, &bob)
		.await
		.unwrap_err();
	assert!(matches!(err, ChatError::Forbidden));

	fx.conversations
		.change_member_role(group.id, &bob.user_id, GroupRole::Admin, &creator)
		.await
		.expect("promote");
	let membership = fx.store.group_membership(group.id, &bob.user_id).await.unwrap().unwrap();
	assert_eq!(membership.role, GroupRole::Admin);
}

#[tokio::test]
async fn rename_rules_per_kind() {
	let fx = fixture();
	let creator = volunteer("ann", &[]);
	let bob = volunteer("bob", &[]);

	let direct = fx.conversations.create_direct(&creator, &bob.user_id).await.expect("direct");
	let err = fx
		.conversations
		.rename_conversation(direct.id, "Nope", &platform_admin("root"))
		.await
		.unwrap_err();
	assert!(matches!(err, ChatError::Validation { field: "kind", .. }));

	let group = fx
		.conversations
		.create_group(&creator, "Drivers", &[bob.user_id.clone()])
		.await
		.expect("group");
	let err = fx.conversations.rename_conversation(group.id, "New Name", &bob).await.unwrap_err();
	assert!(matches!(err, ChatError::Forbidden));

	fx.conversations
		.rename_conversation(group.id, "Evening Drivers", &creator)
		.await
		.expect("group admin renames");
	let renamed = fx.store.conversation(group.id).await.unwrap().unwrap();
	assert_eq!(renamed.display_name.as_deref(), Some("Evening Drivers"));
}

#[tokio::test]
async fn ensure_channel_is_idempotent() {
	let fx = fixture();

	let first = fx.conversations.ensure_channel("hosts", "Hosts").await.expect("create");
	let second = fx.conversations.ensure_channel("hosts", "Hosts").await.expect("reuse");
	assert_eq!(first.id, second.id);
	assert_eq!(first.room.as_deref(), Some("hosts"));
	assert_eq!(first.kind, ConversationKind::Channel);
}

#[tokio::test]
async fn listing_includes_channels_without_participant_rows() {
	let fx = fixture();
	let ann = volunteer("ann", &[]);
	let channel = fx.conversations.ensure_channel("general", "General").await.expect("channel");

	let listed = fx.conversations.list_conversations_for(&ann.user_id).await.expect("list");
	assert!(listed.iter().any(|c| c.id == channel.id));
}

#[tokio::test]
async fn listing_orders_by_most_recent_activity() {
	let fx = fixture();
	let ann = volunteer("ann", &[]);
	let older = fx.conversations.create_group(&ann, "Older", &[]).await.expect("older");
	let newer = fx.conversations.create_group(&ann, "Newer", &[]).await.expect("newer");

	// A fresh message in the older group bumps it to the top.
	fx.store
		.insert_message(&Message {
			id: MessageId::new_v4(),
			conversation_id: older.id,
			user_id: uid("bob"),
			content: "pickup at 4".to_string(),
			sender_display_name: "Bob".to_string(),
			created_at: i64::MAX - 1,
		})
		.await
		.unwrap();

	let listed = fx.conversations.list_conversations_for(&ann.user_id).await.expect("list");
	let older_pos = listed.iter().position(|c| c.id == older.id).expect("older listed");
	let newer_pos = listed.iter().position(|c| c.id == newer.id).expect("newer listed");
	assert!(older_pos < newer_pos);
}

#[tokio::test]
async fn delete_group_requires_platform_admin_and_clears_listings() {
	let fx = fixture();
	let creator = volunteer("ann", &[]);
	let bob = volunteer("bob", &[]);
	let group = fx
		.conversations
		.create_group(&creator, "Drivers", &[bob.user_id.clone()])
		.await
		.expect("create");

	let err = fx.conversations.delete_group(group.id, &creator).await.unwrap_err();
	assert!(matches!(err, ChatError::Forbidden));

	fx.conversations
		.delete_group(group.id, &platform_admin("root"))
		.await
		.expect("delete");

	let listed = fx.conversations.list_conversations_for(&bob.user_id).await.expect("list");
	assert!(!listed.iter().any(|c| c.id == group.id));
	assert!(fx.store.group_memberships_of(group.id).await.unwrap().is_empty());
	assert!(fx.store.thread_participants_of(group.id).await.unwrap().is_empty());
}
