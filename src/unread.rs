//! Aggregate unread counting

use crate::store::Directory;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// Computes a user's total unread count across all conversations
///
/// The total is the sum of per-conversation counts as reported by the
/// directory at the moment of the call. Nothing is cached: marking a
/// conversation read makes the next load return a smaller number, so the
/// value is not monotonic. Racing loads are resolved by the caller (the
/// session keeps a sequence number per issued load).
#[derive(Clone)]
pub struct UnreadAggregator {
    directory: Arc<dyn Directory>,
}

impl UnreadAggregator {
    /// Create an aggregator over the given directory
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Total unread messages for `user_id`
    pub async fn load(&self, user_id: &str) -> Result<u64> {
        let summaries = self.directory.conversations_for_user(user_id).await?;
        let total = summaries.iter().map(|s| s.unread_count).sum();
        debug!(
            "Unread total for {}: {} across {} conversations",
            user_id,
            total,
            summaries.len()
        );
        Ok(total)
    }
}
