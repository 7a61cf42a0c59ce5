#![forbid(unsafe_code)]

mod audit;
mod error;
mod memory;
mod sqlite;
mod store;

pub use audit::{AuditEvent, AuditService};
pub use error::StoreError;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use store::{EntityStore, UserRecord};
