//! Membership resolution for live event filtering
//!
//! Sessions receive events they may not be entitled to (a global feed, a
//! stale routing table); this module answers whether the event's
//! conversation currently includes the session's user.

use crate::store::{Directory, Participant};
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// Resolves whether a user belongs to a conversation
///
/// A user whose membership row was removed is not a member. Lookup
/// failures propagate unchanged so callers can decide how to degrade; the
/// session treats them as "not a member".
#[derive(Clone)]
pub struct MembershipResolver {
    directory: Arc<dyn Directory>,
}

impl MembershipResolver {
    /// Create a resolver over the given directory
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Full membership record, `None` when absent or removed
    pub async fn lookup(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>> {
        self.directory.participant(conversation_id, user_id).await
    }

    /// Whether the user is currently a member of the conversation
    pub async fn is_member(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        let member = self.lookup(conversation_id, user_id).await?.is_some();
        debug!(
            "Membership check for {} in {}: {}",
            user_id, conversation_id, member
        );
        Ok(member)
    }
}
