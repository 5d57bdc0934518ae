//! Conversation store module
//!
//! This module holds the data model and the bundled storage collaborators:
//! - `conversation` - Conversation records and last-message bookkeeping
//! - `participant` - Membership records and read watermarks
//! - `message` - Message structures and soft edit/delete state
//! - `directory` - Read-side contract consumed by the session core
//! - `memory` - In-memory store for tests and single-process embedding
//! - `sqlite` - SQLite-backed store
//!
//! Both stores implement the [`Directory`] contract and own the write path:
//! conversation creation, membership changes, message appends and read
//! marks go through them, never through the session core.

// Submodules
pub mod conversation;
pub mod directory;
pub mod memory;
pub mod message;
pub mod participant;
pub mod sqlite;

// Re-export commonly used types
pub use conversation::{Conversation, ConversationKind};
pub use directory::{ConversationUnread, Directory};
pub use memory::MemoryStore;
pub use message::{Message, MessageBody, PREVIEW_MAX_CHARS};
pub use participant::{Participant, ParticipantRole};
pub use sqlite::SqliteStore;

/// Current Unix timestamp in milliseconds
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
