//! Conversation records and last-message bookkeeping

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// One-to-one chat between two users
    Direct,
    /// Named chat with any number of members
    Group,
}

/// Represents a conversation between users
///
/// Conversations are never hard-deleted; the store exposes no delete
/// operation. Per-viewer unread counts are derived from participant read
/// watermarks and never stored on this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique identifier
    pub id: String,
    /// Direct or group
    pub kind: ConversationKind,
    /// Display name (groups; direct chats render the counterpart's name)
    pub name: Option<String>,
    /// Task this conversation was started from, if any
    #[serde(default)]
    pub task_id: Option<String>,
    /// Project this conversation was started from, if any
    #[serde(default)]
    pub project_id: Option<String>,
    /// Creation timestamp in Unix milliseconds
    pub created_at: i64,
    /// Last mutation timestamp in Unix milliseconds
    pub updated_at: i64,
    /// When the latest message arrived, if any
    #[serde(default)]
    pub last_message_at: Option<i64>,
    /// Preview line of the latest message, if any
    #[serde(default)]
    pub last_message_preview: Option<String>,
}

impl Conversation {
    /// Create a new conversation with a fresh identifier
    pub fn new(
        kind: ConversationKind,
        name: Option<String>,
        task_id: Option<String>,
        project_id: Option<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            name,
            task_id,
            project_id,
            created_at,
            updated_at: created_at,
            last_message_at: None,
            last_message_preview: None,
        }
    }

    /// Record an appended message on the conversation summary
    pub fn record_message(&mut self, at: i64, preview: String) {
        self.last_message_at = Some(at);
        self.last_message_preview = Some(preview);
        self.updated_at = at;
    }

    /// Record a membership or metadata change
    pub fn touch(&mut self, at: i64) {
        self.updated_at = at;
    }
}
