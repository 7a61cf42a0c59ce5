#![forbid(unsafe_code)]

use std::sync::Arc;

use pantry_domain::{Conversation, ConversationKind, Message, UserId};
use pantry_protocol::{MessageEvent, ServerFrame};
use pantry_store::{EntityStore, StoreError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::permissions::PermissionResolver;
use crate::presence::PresenceRegistry;

/// Best-effort fan-out of new-message events to connected users.
///
/// Delivery is at-most-once per connection and never blocks or fails the
/// message write that triggered it.
#[derive(Clone)]
pub struct NotificationBroadcaster {
	store: Arc<dyn EntityStore>,
	presence: PresenceRegistry,
	permissions: Arc<PermissionResolver>,
}

impl NotificationBroadcaster {
	pub fn new(store: Arc<dyn EntityStore>, presence: PresenceRegistry, permissions: Arc<PermissionResolver>) -> Self {
		Self {
			store,
			presence,
			permissions,
		}
	}

	/// Users who should receive a live push for `message`, author excluded.
	pub async fn targets_for(&self, conversation: &Conversation, message: &Message) -> Result<Vec<UserId>, StoreError> {
		let mut targets = match conversation.kind {
			ConversationKind::Direct => self
				.store
				.participants_of(conversation.id)
				.await?
				.into_iter()
				.map(|p| p.user_id)
				.collect::<Vec<_>>(),
			ConversationKind::Group => self
				.store
				.thread_participants_of(conversation.id)
				.await?
				.into_iter()
				.filter(|tp| tp.receives_live_push())
				.map(|tp| tp.user_id)
				.collect(),
			ConversationKind::Channel => {
				let Some(room) = conversation.room.as_deref() else {
					warn!(conversation = %conversation.id, "channel conversation without a room, skipping broadcast");
					return Ok(Vec::new());
				};
				let Some(capability) = self.permissions.capability_for(room) else {
					warn!(room, "no capability mapped for room, skipping broadcast");
					return Ok(Vec::new());
				};
				self.store
					.users_with_capability(capability)
					.await?
					.into_iter()
					.map(|u| u.id)
					.collect()
			}
		};

		targets.retain(|u| *u != message.user_id);
		Ok(targets)
	}

	/// Fan the message out to every live connection of every target.
	///
	/// Failures are logged and skipped; this function never returns an error
	/// to the caller.
	pub async fn broadcast(&self, conversation: &Conversation, message: &Message) {
		let targets = match self.targets_for(conversation, message).await {
			Ok(targets) => targets,
			Err(e) => {
				warn!(conversation = %conversation.id, error = %e, "broadcast target resolution failed");
				metrics::counter!("pantry_chat_broadcast_failures_total").increment(1);
				return;
			}
		};

		let frame = ServerFrame::NewMessage {
			message: MessageEvent::from(message),
			timestamp: message.created_at,
		};

		for user in &targets {
			for sender in self.presence.senders_for(user).await {
				match sender.try_send(frame.clone()) {
					Ok(()) => {
						metrics::counter!("pantry_chat_broadcast_frames_total").increment(1);
					}
					Err(mpsc::error::TrySendError::Full(_)) => {
						metrics::counter!("pantry_chat_broadcast_failures_total").increment(1);
						debug!(user = %user, "broadcast dropped: subscriber queue full");
					}
					Err(mpsc::error::TrySendError::Closed(_)) => {}
				}
			}
		}
	}
}
