//! In-memory conversation store
//!
//! Backs tests and single-process embeddings with the same write path and
//! [`Directory`] contract as the SQLite store, without touching disk.

use super::conversation::{Conversation, ConversationKind};
use super::directory::{ConversationUnread, Directory};
use super::message::{Message, MessageBody};
use super::now_ms;
use super::participant::{Participant, ParticipantRole};
use crate::channel::MessageBus;
use crate::event::MessageEvent;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    conversations: HashMap<String, Conversation>,
    /// Membership rows keyed by conversation id
    participants: HashMap<String, Vec<Participant>>,
    /// Messages keyed by conversation id, append order
    messages: HashMap<String, Vec<Message>>,
    next_message_id: i64,
}

/// In-memory conversation store
pub struct MemoryStore {
    inner: Mutex<Inner>,
    bus: Option<Arc<MessageBus>>,
}

impl MemoryStore {
    /// Create an empty store with no event publishing
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_message_id: 1,
                ..Inner::default()
            }),
            bus: None,
        }
    }

    /// Create an empty store that publishes insert events to `bus`
    pub fn with_bus(bus: Arc<MessageBus>) -> Self {
        Self {
            bus: Some(bus),
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a writer panicked; the data is intact
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a new conversation with `owner_id` as its owning participant
    ///
    /// # Arguments
    /// * `kind` - Direct or group
    /// * `name` - Display name (usually `None` for direct chats)
    /// * `task_id` / `project_id` - Originating work item links, if any
    /// * `owner_id` - The creating user
    pub fn create_conversation(
        &self,
        kind: ConversationKind,
        name: Option<String>,
        task_id: Option<String>,
        project_id: Option<String>,
        owner_id: &str,
    ) -> Result<Conversation> {
        if owner_id.is_empty() {
            return Err(Error::Store("Conversation owner must not be empty".to_string()));
        }

        let now = now_ms();
        let conversation = Conversation::new(kind, name, task_id, project_id, now);
        let owner = Participant::new(
            conversation.id.clone(),
            owner_id.to_string(),
            ParticipantRole::Owner,
            now,
        );

        let mut inner = self.lock();
        inner
            .participants
            .insert(conversation.id.clone(), vec![owner]);
        inner.messages.insert(conversation.id.clone(), Vec::new());
        inner
            .conversations
            .insert(conversation.id.clone(), conversation.clone());

        Ok(conversation)
    }

    /// Add a member to a conversation
    ///
    /// Re-adding a current member returns the existing record unchanged, so
    /// the read watermark survives. A user who left and rejoins gets a
    /// fresh record with a zero watermark.
    pub fn add_participant(&self, conversation_id: &str, user_id: &str) -> Result<Participant> {
        let mut inner = self.lock();
        if !inner.conversations.contains_key(conversation_id) {
            return Err(Error::Store(format!(
                "Unknown conversation: {}",
                conversation_id
            )));
        }

        let now = now_ms();
        let rows = inner
            .participants
            .entry(conversation_id.to_string())
            .or_default();
        if let Some(existing) = rows.iter().find(|p| p.user_id == user_id) {
            return Ok(existing.clone());
        }

        let participant = Participant::new(
            conversation_id.to_string(),
            user_id.to_string(),
            ParticipantRole::Member,
            now,
        );
        rows.push(participant.clone());

        if let Some(conversation) = inner.conversations.get_mut(conversation_id) {
            conversation.touch(now);
        }
        Ok(participant)
    }

    /// Remove a member from a conversation
    pub fn remove_participant(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        let mut inner = self.lock();
        let rows = inner
            .participants
            .get_mut(conversation_id)
            .ok_or_else(|| Error::Store(format!("Unknown conversation: {}", conversation_id)))?;

        let before = rows.len();
        rows.retain(|p| p.user_id != user_id);
        if rows.len() == before {
            return Err(Error::Store(format!(
                "User {} is not a participant of {}",
                user_id, conversation_id
            )));
        }

        let now = now_ms();
        if let Some(conversation) = inner.conversations.get_mut(conversation_id) {
            conversation.touch(now);
        }
        Ok(())
    }

    /// Mute or unmute a conversation for one member
    pub fn set_muted(&self, conversation_id: &str, user_id: &str, muted: bool) -> Result<()> {
        let mut inner = self.lock();
        let participant = inner
            .participants
            .get_mut(conversation_id)
            .and_then(|rows| rows.iter_mut().find(|p| p.user_id == user_id))
            .ok_or_else(|| {
                Error::Store(format!(
                    "User {} is not a participant of {}",
                    user_id, conversation_id
                ))
            })?;
        participant.muted = muted;
        Ok(())
    }

    /// Append a message to a conversation
    ///
    /// The sender must be a participant; `reply_to` must name a message in
    /// the same conversation. Assigns the message identifier and creation
    /// timestamp, updates the conversation's last-message fields and
    /// publishes an insert event when a bus is attached.
    pub fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        body: MessageBody,
        reply_to: Option<i64>,
    ) -> Result<Message> {
        self.append_message_at(conversation_id, sender_id, body, reply_to, now_ms())
    }

    pub(crate) fn append_message_at(
        &self,
        conversation_id: &str,
        sender_id: &str,
        body: MessageBody,
        reply_to: Option<i64>,
        created_at: i64,
    ) -> Result<Message> {
        let (message, recipients) = {
            let mut inner = self.lock();
            if !inner.conversations.contains_key(conversation_id) {
                return Err(Error::Store(format!(
                    "Unknown conversation: {}",
                    conversation_id
                )));
            }

            let rows = inner.participants.get(conversation_id);
            let is_sender_member = rows
                .map(|rows| rows.iter().any(|p| p.user_id == sender_id))
                .unwrap_or(false);
            if !is_sender_member {
                return Err(Error::Store(format!(
                    "Sender {} is not a participant of {}",
                    sender_id, conversation_id
                )));
            }

            if let Some(reply_id) = reply_to {
                let in_same_conversation = inner
                    .messages
                    .get(conversation_id)
                    .map(|msgs| msgs.iter().any(|m| m.id == reply_id))
                    .unwrap_or(false);
                if !in_same_conversation {
                    return Err(Error::Store(format!(
                        "Reply target {} is not in conversation {}",
                        reply_id, conversation_id
                    )));
                }
            }

            let id = inner.next_message_id;
            inner.next_message_id += 1;

            let message = Message::new(
                id,
                conversation_id.to_string(),
                sender_id.to_string(),
                body,
                reply_to,
                created_at,
            );
            let preview = message.body.preview();
            inner
                .messages
                .entry(conversation_id.to_string())
                .or_default()
                .push(message.clone());
            if let Some(conversation) = inner.conversations.get_mut(conversation_id) {
                conversation.record_message(created_at, preview);
            }

            let recipients: Vec<String> = inner
                .participants
                .get(conversation_id)
                .map(|rows| rows.iter().map(|p| p.user_id.clone()).collect())
                .unwrap_or_default();
            (message, recipients)
        };

        // Publish outside the lock
        if let Some(bus) = &self.bus {
            bus.publish(MessageEvent::from(&message), &recipients);
        }
        Ok(message)
    }

    /// Advance a member's read watermark to now
    pub fn mark_conversation_read(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        self.mark_conversation_read_at(conversation_id, user_id, now_ms())
    }

    pub(crate) fn mark_conversation_read_at(
        &self,
        conversation_id: &str,
        user_id: &str,
        at: i64,
    ) -> Result<()> {
        let mut inner = self.lock();
        let participant = inner
            .participants
            .get_mut(conversation_id)
            .and_then(|rows| rows.iter_mut().find(|p| p.user_id == user_id))
            .ok_or_else(|| {
                Error::Store(format!(
                    "User {} is not a participant of {}",
                    user_id, conversation_id
                ))
            })?;
        participant.mark_read(at);
        Ok(())
    }

    /// Replace a message body and stamp the edited state
    pub fn edit_message(&self, message_id: i64, body: MessageBody) -> Result<()> {
        let mut inner = self.lock();
        let now = now_ms();
        for messages in inner.messages.values_mut() {
            if let Some(message) = messages.iter_mut().find(|m| m.id == message_id) {
                message.mark_edited(body, now);
                return Ok(());
            }
        }
        Err(Error::Store(format!("Unknown message: {}", message_id)))
    }

    /// Stamp a message's deleted state (the row is kept)
    pub fn delete_message(&self, message_id: i64) -> Result<()> {
        let mut inner = self.lock();
        let now = now_ms();
        for messages in inner.messages.values_mut() {
            if let Some(message) = messages.iter_mut().find(|m| m.id == message_id) {
                message.mark_deleted(now);
                return Ok(());
            }
        }
        Err(Error::Store(format!("Unknown message: {}", message_id)))
    }

    /// Get a conversation by id
    pub fn conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self.lock().conversations.get(conversation_id).cloned())
    }

    /// Messages of a conversation ordered by creation time, id tie-break
    pub fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let mut messages = self
            .lock()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        messages.sort_by_key(|m| m.sort_key());
        Ok(messages)
    }

    /// All membership rows of a conversation
    pub fn participants(&self, conversation_id: &str) -> Result<Vec<Participant>> {
        Ok(self
            .lock()
            .participants
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    /// Unread count of one conversation for one member
    pub fn unread_count(&self, conversation_id: &str, user_id: &str) -> Result<u64> {
        let inner = self.lock();
        let participant = inner
            .participants
            .get(conversation_id)
            .and_then(|rows| rows.iter().find(|p| p.user_id == user_id))
            .ok_or_else(|| {
                Error::Store(format!(
                    "User {} is not a participant of {}",
                    user_id, conversation_id
                ))
            })?;
        let count = inner
            .messages
            .get(conversation_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| participant.counts_as_unread(m))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as u64)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>> {
        Ok(self
            .lock()
            .participants
            .get(conversation_id)
            .and_then(|rows| rows.iter().find(|p| p.user_id == user_id))
            .cloned())
    }

    async fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationUnread>> {
        let inner = self.lock();
        let mut summaries = Vec::new();
        for (conversation_id, rows) in &inner.participants {
            let Some(participant) = rows.iter().find(|p| p.user_id == user_id) else {
                continue;
            };
            let unread_count = inner
                .messages
                .get(conversation_id)
                .map(|msgs| {
                    msgs.iter()
                        .filter(|m| participant.counts_as_unread(m))
                        .count()
                })
                .unwrap_or(0);
            summaries.push(ConversationUnread {
                conversation_id: conversation_id.clone(),
                unread_count: unread_count as u64,
            });
        }
        Ok(summaries)
    }
}
