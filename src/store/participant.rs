//! Conversation membership and per-user read watermarks

use super::message::Message;
use serde::{Deserialize, Serialize};

/// Role of a participant inside a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// Conversation creator, may manage membership
    Owner,
    /// Regular member
    Member,
}

impl Default for ParticipantRole {
    fn default() -> Self {
        Self::Member
    }
}

/// Membership record of one user in one conversation
///
/// The `last_read_at` watermark is the sole source of truth for unread
/// state: a message is unread for this participant iff it was created
/// strictly after the watermark and was not authored by the participant.
/// Rows are removed when the user leaves the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Conversation this membership belongs to
    pub conversation_id: String,
    /// The member
    pub user_id: String,
    /// Role within the conversation
    #[serde(default)]
    pub role: ParticipantRole,
    /// Whether notifications are muted for this conversation
    #[serde(default)]
    pub muted: bool,
    /// When the user joined (Unix milliseconds)
    pub joined_at: i64,
    /// Read watermark (Unix milliseconds, 0 = never read)
    #[serde(default)]
    pub last_read_at: i64,
}

impl Participant {
    /// Create a new membership record with an unread watermark of zero
    pub fn new(
        conversation_id: String,
        user_id: String,
        role: ParticipantRole,
        joined_at: i64,
    ) -> Self {
        Self {
            conversation_id,
            user_id,
            role,
            muted: false,
            joined_at,
            last_read_at: 0,
        }
    }

    /// Advance the read watermark
    ///
    /// The watermark only moves forward: a mark carrying an older timestamp
    /// (a stale tab, a delayed request) is a no-op.
    pub fn mark_read(&mut self, at: i64) {
        if at > self.last_read_at {
            self.last_read_at = at;
        }
    }

    /// Whether `message` counts toward this participant's unread total
    pub fn counts_as_unread(&self, message: &Message) -> bool {
        message.created_at > self.last_read_at && message.sender_id != self.user_id
    }
}
