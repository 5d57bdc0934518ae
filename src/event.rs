//! Event module
//!
//! This module defines the payload carried on the event channel when a
//! message is inserted:
//! - [`MessageEvent`] structure
//! - JSON serialization helpers for the wire
//!
//! Events are summaries, not the stored row: they carry exactly what a
//! client session needs to filter, render a preview and deduplicate.

use crate::store::{Message, MessageBody};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Notification payload published when a message is inserted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEvent {
    /// Identifier of the inserted message (dedup key)
    pub message_id: i64,

    /// Conversation the message belongs to
    pub conversation_id: String,

    /// User who authored the message
    pub sender_id: String,

    /// Message body, including its kind discriminator
    pub body: MessageBody,

    /// Creation timestamp in Unix milliseconds
    pub created_at: i64,
}

impl MessageEvent {
    /// Encode the event to JSON for the wire
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::JsonSerialization)
    }

    /// Decode an event from JSON
    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(Error::JsonSerialization)
    }
}

impl From<&Message> for MessageEvent {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id,
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.clone(),
            body: message.body.clone(),
            created_at: message.created_at,
        }
    }
}
