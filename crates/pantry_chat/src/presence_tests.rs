#![forbid(unsafe_code)]

use tokio::sync::mpsc;

use crate::presence::{PresenceConfig, PresenceRegistry};
use crate::testkit::uid;

#[tokio::test]
async fn register_and_unregister_track_counts() {
	let presence = PresenceRegistry::new(PresenceConfig::default());
	let (tx1, _rx1) = mpsc::channel(4);
	let (tx2, _rx2) = mpsc::channel(4);

	presence.register(uid("ann"), 1, tx1).await;
	presence.register(uid("ann"), 2, tx2).await;
	assert_eq!(presence.connected_user_count().await, 1);
	assert_eq!(presence.connection_count().await, 2);

	presence.unregister(1).await;
	assert_eq!(presence.connected_user_count().await, 1);
	assert_eq!(presence.connection_count().await, 1);

	presence.unregister(2).await;
	assert_eq!(presence.connected_user_count().await, 0);
	assert_eq!(presence.connection_count().await, 0);

	// Unknown connection ids are ignored.
	presence.unregister(99).await;
}

#[tokio::test]
async fn senders_for_returns_every_live_connection() {
	let presence = PresenceRegistry::new(PresenceConfig::default());
	let (tx1, _rx1) = mpsc::channel(4);
	let (tx2, _rx2) = mpsc::channel(4);
	let (other, _rx3) = mpsc::channel(4);

	presence.register(uid("ann"), 1, tx1).await;
	presence.register(uid("ann"), 2, tx2).await;
	presence.register(uid("bob"), 3, other).await;

	assert_eq!(presence.senders_for(&uid("ann")).await.len(), 2);
	assert_eq!(presence.senders_for(&uid("bob")).await.len(), 1);
	assert!(presence.senders_for(&uid("zed")).await.is_empty());
}

#[tokio::test]
async fn closed_senders_are_pruned_on_snapshot() {
	let presence = PresenceRegistry::new(PresenceConfig::default());
	let (tx1, rx1) = mpsc::channel(4);
	let (tx2, _rx2) = mpsc::channel(4);

	presence.register(uid("ann"), 1, tx1).await;
	presence.register(uid("ann"), 2, tx2).await;
	drop(rx1);

	assert_eq!(presence.senders_for(&uid("ann")).await.len(), 1);
	assert_eq!(presence.connection_count().await, 1);
}

#[tokio::test]
async fn dropping_the_last_connection_removes_the_user() {
	let presence = PresenceRegistry::new(PresenceConfig::default());
	let (tx, rx) = mpsc::channel::<pantry_protocol::ServerFrame>(4);

	presence.register(uid("ann"), 1, tx).await;
	drop(rx);

	assert!(presence.senders_for(&uid("ann")).await.is_empty());
	assert_eq!(presence.connected_user_count().await, 0);
}
