//! Read-side contract of the storage collaborator
//!
//! The session core never walks tables itself: it asks the directory
//! whether a user is a member of a conversation, and what that user's
//! conversations and unread counts are right now. Both calls are
//! suspension points; a deployment may answer them from a remote service
//! instead of the bundled stores.

use super::participant::Participant;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-conversation unread summary for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationUnread {
    /// The conversation
    pub conversation_id: String,
    /// Number of unread messages for the queried user
    pub unread_count: u64,
}

/// Read queries the session core issues against the storage collaborator
#[async_trait]
pub trait Directory: Send + Sync {
    /// Look up a membership record
    ///
    /// Returns `None` when the user never joined or has been removed;
    /// lookup failures propagate so callers can decide how to degrade.
    async fn participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>>;

    /// All conversations the user currently belongs to, with unread counts
    ///
    /// Counts follow the read-watermark rule: messages created strictly
    /// after the participant's `last_read_at`, excluding the user's own.
    async fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationUnread>>;
}
