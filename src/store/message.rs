//! Message structures and soft edit/delete state

use serde::{Deserialize, Serialize};

/// Maximum number of characters kept in a conversation preview line
pub const PREVIEW_MAX_CHARS: usize = 80;

/// Message body with its kind discriminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    /// Plain text message
    Text {
        /// The text content
        text: String,
    },
    /// File attachment
    File {
        /// Original file name
        name: String,
        /// Download location
        url: String,
    },
    /// Image attachment
    Image {
        /// Download location
        url: String,
    },
    /// System-generated notice (joins, renames, task links)
    System {
        /// The notice text
        text: String,
    },
}

impl MessageBody {
    /// Create a plain text body (convenience method)
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Preview line for conversation lists, truncated to [`PREVIEW_MAX_CHARS`]
    pub fn preview(&self) -> String {
        let line = match self {
            Self::Text { text } => text.clone(),
            Self::File { name, .. } => format!("File: {}", name),
            Self::Image { .. } => "Image".to_string(),
            Self::System { text } => text.clone(),
        };
        truncate_preview(&line)
    }
}

/// Represents a stored message
///
/// Messages are immutable once written except for the edited/deleted soft
/// states; identifier and creation timestamp never change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned monotonic identifier (never reused)
    pub id: i64,
    /// Conversation this message belongs to
    pub conversation_id: String,
    /// Authoring user
    pub sender_id: String,
    /// Body with kind discriminator
    pub body: MessageBody,
    /// Message in the same conversation this one replies to
    #[serde(default)]
    pub reply_to: Option<i64>,
    /// Whether the body has been edited after creation
    #[serde(default)]
    pub edited: bool,
    /// When the last edit happened (Unix milliseconds)
    #[serde(default)]
    pub edited_at: Option<i64>,
    /// Whether the message was removed (soft flag, row is kept)
    #[serde(default)]
    pub deleted: bool,
    /// When the removal happened (Unix milliseconds)
    #[serde(default)]
    pub deleted_at: Option<i64>,
    /// Creation timestamp in Unix milliseconds, assigned once by the writer
    pub created_at: i64,
}

impl Message {
    /// Create a new message
    pub fn new(
        id: i64,
        conversation_id: String,
        sender_id: String,
        body: MessageBody,
        reply_to: Option<i64>,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_id,
            body,
            reply_to,
            edited: false,
            edited_at: None,
            deleted: false,
            deleted_at: None,
            created_at,
        }
    }

    /// Replace the body and stamp the edited state
    pub fn mark_edited(&mut self, body: MessageBody, at: i64) {
        self.body = body;
        self.edited = true;
        self.edited_at = Some(at);
    }

    /// Stamp the deleted state (the row is kept)
    pub fn mark_deleted(&mut self, at: i64) {
        self.deleted = true;
        self.deleted_at = Some(at);
    }

    /// Ordering key: creation timestamp with identifier as tie-break
    pub fn sort_key(&self) -> (i64, i64) {
        (self.created_at, self.id)
    }
}

/// Truncate a preview line to [`PREVIEW_MAX_CHARS`] characters
fn truncate_preview(line: &str) -> String {
    if line.chars().count() <= PREVIEW_MAX_CHARS {
        line.to_string()
    } else {
        let mut truncated: String = line.chars().take(PREVIEW_MAX_CHARS).collect();
        truncated.push('…');
        truncated
    }
}
