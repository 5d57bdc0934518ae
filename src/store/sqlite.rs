//! SQLite-backed conversation store
//!
//! This module provides the persistent implementation of the conversation
//! store: conversations, participants and messages live in three tables,
//! and the unread math runs as SQL aggregates over the participant read
//! watermarks.

use super::conversation::{Conversation, ConversationKind};
use super::directory::{ConversationUnread, Directory};
use super::message::{Message, MessageBody};
use super::now_ms;
use super::participant::{Participant, ParticipantRole};
use crate::channel::MessageBus;
use crate::config::Settings;
use crate::event::MessageEvent;
use crate::{Error, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite-backed conversation store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    bus: Option<Arc<MessageBus>>,
}

impl SqliteStore {
    /// Create a store backed by a database file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::Store(format!("Failed to open database: {}", e)))?;

        let store = Self {
            conn: Mutex::new(conn),
            bus: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Store(format!("Failed to create in-memory database: {}", e)))?;

        let store = Self {
            conn: Mutex::new(conn),
            bus: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create a store under `settings.storage_path` (`huddle.db`)
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let dir = Path::new(&settings.storage_path);
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::Store(format!("Failed to create storage directory: {}", e)))?;
        }
        Self::new(dir.join("huddle.db"))
    }

    /// Publish insert events to `bus` from now on
    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock only means a writer panicked; the data is intact
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();

        // Conversations table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                name TEXT,
                task_id TEXT,
                project_id TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_message_at INTEGER,
                last_message_preview TEXT
            )",
            [],
        )?;

        // Participants table (one row per member per conversation)
        conn.execute(
            "CREATE TABLE IF NOT EXISTS participants (
                conversation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                muted INTEGER NOT NULL,
                joined_at INTEGER NOT NULL,
                last_read_at INTEGER NOT NULL,
                PRIMARY KEY (conversation_id, user_id),
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            )",
            [],
        )?;

        // Messages table; AUTOINCREMENT keeps ids monotonic and never reused
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                body TEXT NOT NULL,
                reply_to INTEGER,
                edited INTEGER NOT NULL,
                edited_at INTEGER,
                deleted INTEGER NOT NULL,
                deleted_at INTEGER,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            )",
            [],
        )?;

        // Create indexes for the hot queries
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages(conversation_id, created_at)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_participants_user ON participants(user_id)",
            [],
        )?;

        Ok(())
    }

    // ========== Conversations ==========

    /// Create a new conversation with `owner_id` as its owning participant
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

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, kind, name, task_id, project_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &conversation.id,
                kind_to_str(conversation.kind),
                &conversation.name,
                &conversation.task_id,
                &conversation.project_id,
                conversation.created_at,
                conversation.updated_at,
            ],
        )?;
        tx.execute(
            "INSERT INTO participants (conversation_id, user_id, role, muted, joined_at, last_read_at)
             VALUES (?1, ?2, ?3, 0, ?4, 0)",
            params![
                &conversation.id,
                owner_id,
                role_to_str(ParticipantRole::Owner),
                now,
            ],
        )?;
        tx.commit()?;

        Ok(conversation)
    }

    /// Get a conversation by id
    pub fn conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let conn = self.lock();
        let result = conn
            .query_row(
                "SELECT id, kind, name, task_id, project_id, created_at, updated_at,
                        last_message_at, last_message_preview
                 FROM conversations WHERE id = ?1",
                params![conversation_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, Option<i64>>(7)?,
                        row.get::<_, Option<String>>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, kind, name, task_id, project_id, created_at, updated_at, last_message_at, last_message_preview)) =
            result
        else {
            return Ok(None);
        };

        Ok(Some(Conversation {
            id,
            kind: kind_from_str(&kind)?,
            name,
            task_id,
            project_id,
            created_at,
            updated_at,
            last_message_at,
            last_message_preview,
        }))
    }

    // ========== Participants ==========

    /// Add a member to a conversation
    ///
    /// Re-adding a current member returns the existing record unchanged, so
    /// the read watermark survives. A user who left and rejoins gets a
    /// fresh record with a zero watermark.
    pub fn add_participant(&self, conversation_id: &str, user_id: &str) -> Result<Participant> {
        if self.conversation(conversation_id)?.is_none() {
            return Err(Error::Store(format!(
                "Unknown conversation: {}",
                conversation_id
            )));
        }
        if let Some(existing) = self.participant_row(conversation_id, user_id)? {
            return Ok(existing);
        }

        let now = now_ms();
        let participant = Participant::new(
            conversation_id.to_string(),
            user_id.to_string(),
            ParticipantRole::Member,
            now,
        );

        let conn = self.lock();
        conn.execute(
            "INSERT INTO participants (conversation_id, user_id, role, muted, joined_at, last_read_at)
             VALUES (?1, ?2, ?3, 0, ?4, 0)",
            params![
                conversation_id,
                user_id,
                role_to_str(participant.role),
                now,
            ],
        )?;
        conn.execute(
            "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
            params![conversation_id, now],
        )?;
        Ok(participant)
    }

    /// Remove a member from a conversation
    pub fn remove_participant(&self, conversation_id: &str, user_id: &str) -> Result<()> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id, user_id],
        )?;
        if removed == 0 {
            return Err(Error::Store(format!(
                "User {} is not a participant of {}",
                user_id, conversation_id
            )));
        }
        conn.execute(
            "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
            params![conversation_id, now_ms()],
        )?;
        Ok(())
    }

    /// Mute or unmute a conversation for one member
    pub fn set_muted(&self, conversation_id: &str, user_id: &str, muted: bool) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE participants SET muted = ?3 WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id, user_id, muted as i32],
        )?;
        if updated == 0 {
            return Err(Error::Store(format!(
                "User {} is not a participant of {}",
                user_id, conversation_id
            )));
        }
        Ok(())
    }

    /// All membership rows of a conversation
    pub fn participants(&self, conversation_id: &str) -> Result<Vec<Participant>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT conversation_id, user_id, role, muted, joined_at, last_read_at
             FROM participants WHERE conversation_id = ?1",
        )?;

        let mut participants = Vec::new();
        for row in stmt.query_map(params![conversation_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i32>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })? {
            let (conversation_id, user_id, role, muted, joined_at, last_read_at) = row?;
            participants.push(Participant {
                conversation_id,
                user_id,
                role: role_from_str(&role)?,
                muted: muted != 0,
                joined_at,
                last_read_at,
            });
        }
        Ok(participants)
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
        let conn = self.lock();
        // MAX keeps the watermark monotonic under concurrent marks
        let updated = conn.execute(
            "UPDATE participants SET last_read_at = MAX(last_read_at, ?3)
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id, user_id, at],
        )?;
        if updated == 0 {
            return Err(Error::Store(format!(
                "User {} is not a participant of {}",
                user_id, conversation_id
            )));
        }
        Ok(())
    }

    fn participant_row(&self, conversation_id: &str, user_id: &str) -> Result<Option<Participant>> {
        let conn = self.lock();
        let result = conn
            .query_row(
                "SELECT conversation_id, user_id, role, muted, joined_at, last_read_at
                 FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
                params![conversation_id, user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i32>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((conversation_id, user_id, role, muted, joined_at, last_read_at)) = result else {
            return Ok(None);
        };
        Ok(Some(Participant {
            conversation_id,
            user_id,
            role: role_from_str(&role)?,
            muted: muted != 0,
            joined_at,
            last_read_at,
        }))
    }

    // ========== Messages ==========

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
        let body_json = serde_json::to_string(&body)?;
        let preview = body.preview();

        let (message, recipients) = {
            let mut conn = self.lock();
            let tx = conn.transaction()?;

            let conversation_exists = tx
                .query_row(
                    "SELECT 1 FROM conversations WHERE id = ?1",
                    params![conversation_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !conversation_exists {
                return Err(Error::Store(format!(
                    "Unknown conversation: {}",
                    conversation_id
                )));
            }

            let sender_is_member = tx
                .query_row(
                    "SELECT 1 FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
                    params![conversation_id, sender_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !sender_is_member {
                return Err(Error::Store(format!(
                    "Sender {} is not a participant of {}",
                    sender_id, conversation_id
                )));
            }

            if let Some(reply_id) = reply_to {
                let target_conversation: Option<String> = tx
                    .query_row(
                        "SELECT conversation_id FROM messages WHERE id = ?1",
                        params![reply_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if target_conversation.as_deref() != Some(conversation_id) {
                    return Err(Error::Store(format!(
                        "Reply target {} is not in conversation {}",
                        reply_id, conversation_id
                    )));
                }
            }

            tx.execute(
                "INSERT INTO messages (conversation_id, sender_id, body, reply_to, edited, deleted, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, 0, ?5)",
                params![conversation_id, sender_id, &body_json, reply_to, created_at],
            )?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE conversations
                 SET last_message_at = ?2, last_message_preview = ?3, updated_at = ?2
                 WHERE id = ?1",
                params![conversation_id, created_at, &preview],
            )?;

            let mut stmt =
                tx.prepare("SELECT user_id FROM participants WHERE conversation_id = ?1")?;
            let recipients = stmt
                .query_map(params![conversation_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);
            tx.commit()?;

            let message = Message::new(
                id,
                conversation_id.to_string(),
                sender_id.to_string(),
                body,
                reply_to,
                created_at,
            );
            (message, recipients)
        };

        // Publish outside the lock
        if let Some(bus) = &self.bus {
            bus.publish(MessageEvent::from(&message), &recipients);
        }
        Ok(message)
    }

    /// Replace a message body and stamp the edited state
    pub fn edit_message(&self, message_id: i64, body: MessageBody) -> Result<()> {
        let body_json = serde_json::to_string(&body)?;
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE messages SET body = ?2, edited = 1, edited_at = ?3 WHERE id = ?1",
            params![message_id, &body_json, now_ms()],
        )?;
        if updated == 0 {
            return Err(Error::Store(format!("Unknown message: {}", message_id)));
        }
        Ok(())
    }

    /// Stamp a message's deleted state (the row is kept)
    pub fn delete_message(&self, message_id: i64) -> Result<()> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE messages SET deleted = 1, deleted_at = ?2 WHERE id = ?1",
            params![message_id, now_ms()],
        )?;
        if updated == 0 {
            return Err(Error::Store(format!("Unknown message: {}", message_id)));
        }
        Ok(())
    }

    /// Messages of a conversation ordered by creation time, id tie-break
    pub fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, sender_id, body, reply_to, edited, edited_at, deleted, deleted_at, created_at
             FROM messages WHERE conversation_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;

        let mut messages = Vec::new();
        for row in stmt.query_map(params![conversation_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, i32>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, i32>(6)?,
                row.get::<_, Option<i64>>(7)?,
                row.get::<_, i64>(8)?,
            ))
        })? {
            let (id, sender_id, body_json, reply_to, edited, edited_at, deleted, deleted_at, created_at) =
                row?;
            messages.push(Message {
                id,
                conversation_id: conversation_id.to_string(),
                sender_id,
                body: serde_json::from_str(&body_json)?,
                reply_to,
                edited: edited != 0,
                edited_at,
                deleted: deleted != 0,
                deleted_at,
                created_at,
            });
        }
        Ok(messages)
    }

    /// Unread count of one conversation for one member
    pub fn unread_count(&self, conversation_id: &str, user_id: &str) -> Result<u64> {
        let participant = self
            .participant_row(conversation_id, user_id)?
            .ok_or_else(|| {
                Error::Store(format!(
                    "User {} is not a participant of {}",
                    user_id, conversation_id
                ))
            })?;

        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE conversation_id = ?1 AND created_at > ?2 AND sender_id != ?3",
            params![conversation_id, participant.last_read_at, user_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[async_trait]
impl Directory for SqliteStore {
    async fn participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Participant>> {
        self.participant_row(conversation_id, user_id)
    }

    async fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationUnread>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT p.conversation_id, COUNT(m.id)
             FROM participants p
             LEFT JOIN messages m
               ON m.conversation_id = p.conversation_id
              AND m.created_at > p.last_read_at
              AND m.sender_id != p.user_id
             WHERE p.user_id = ?1
             GROUP BY p.conversation_id",
        )?;

        let summaries = stmt
            .query_map(params![user_id], |row| {
                Ok(ConversationUnread {
                    conversation_id: row.get(0)?,
                    unread_count: row.get::<_, i64>(1)? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(summaries)
    }
}

fn kind_to_str(kind: ConversationKind) -> &'static str {
    match kind {
        ConversationKind::Direct => "direct",
        ConversationKind::Group => "group",
    }
}

fn kind_from_str(raw: &str) -> Result<ConversationKind> {
    match raw {
        "direct" => Ok(ConversationKind::Direct),
        "group" => Ok(ConversationKind::Group),
        other => Err(Error::Store(format!("Unknown conversation kind: {}", other))),
    }
}

fn role_to_str(role: ParticipantRole) -> &'static str {
    match role {
        ParticipantRole::Owner => "owner",
        ParticipantRole::Member => "member",
    }
}

fn role_from_str(raw: &str) -> Result<ParticipantRole> {
    match raw {
        "owner" => Ok(ParticipantRole::Owner),
        "member" => Ok(ParticipantRole::Member),
        other => Err(Error::Store(format!("Unknown participant role: {}", other))),
    }
}
