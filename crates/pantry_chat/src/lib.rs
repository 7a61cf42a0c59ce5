#![forbid(unsafe_code)]

pub mod broadcast;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod permissions;
pub mod presence;
pub mod threads;

#[cfg(test)]
mod testkit;

#[cfg(test)]
mod conversations_tests;
#[cfg(test)]
mod presence_tests;

pub use broadcast::NotificationBroadcaster;
pub use conversations::ConversationService;
pub use error::ChatError;
pub use messages::{DEFAULT_MESSAGE_PAGE, MAX_MESSAGE_PAGE, MessageService};
pub use permissions::PermissionResolver;
pub use presence::{ConnectionId, PresenceConfig, PresenceRegistry};
pub use threads::ThreadStateService;
