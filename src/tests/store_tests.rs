// Store Tests - conversations, participants, messages and unread math
// Most scenarios run against the SQLite store; the memory store gets
// parity checks for the paths sessions depend on.

use crate::store::{
    ConversationKind, Directory, MemoryStore, MessageBody, ParticipantRole, SqliteStore,
    PREVIEW_MAX_CHARS,
};
use tempfile::TempDir;

fn store_with_conversation() -> (SqliteStore, String) {
    let store = SqliteStore::new_in_memory().expect("Failed to create store");
    let conversation = store
        .create_conversation(
            ConversationKind::Group,
            Some("Henderson quote".to_string()),
            None,
            None,
            "alice",
        )
        .expect("Failed to create conversation");
    store
        .add_participant(&conversation.id, "bob")
        .expect("Failed to add bob");
    (store, conversation.id)
}

#[test]
fn test_create_conversation_with_owner() {
    let store = SqliteStore::new_in_memory().expect("Failed to create store");

    let conversation = store
        .create_conversation(
            ConversationKind::Group,
            Some("Roof repair".to_string()),
            Some("task-17".to_string()),
            Some("project-3".to_string()),
            "alice",
        )
        .expect("Failed to create conversation");

    let loaded = store
        .conversation(&conversation.id)
        .expect("Failed to load conversation")
        .expect("Conversation missing");
    assert_eq!(loaded.kind, ConversationKind::Group);
    assert_eq!(loaded.name.as_deref(), Some("Roof repair"));
    assert_eq!(loaded.task_id.as_deref(), Some("task-17"));
    assert_eq!(loaded.project_id.as_deref(), Some("project-3"));
    assert!(loaded.last_message_at.is_none());

    let participants = store
        .participants(&conversation.id)
        .expect("Failed to load participants");
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0].user_id, "alice");
    assert_eq!(participants[0].role, ParticipantRole::Owner);
    assert_eq!(participants[0].last_read_at, 0);
}

#[test]
fn test_create_conversation_requires_owner() {
    let store = SqliteStore::new_in_memory().expect("Failed to create store");
    let result = store.create_conversation(ConversationKind::Direct, None, None, None, "");
    assert!(result.is_err());
}

#[test]
fn test_add_participant_is_idempotent_for_current_members() {
    let (store, conversation_id) = store_with_conversation();

    store
        .mark_conversation_read_at(&conversation_id, "bob", 5_000)
        .expect("Failed to mark read");

    // Re-adding must not reset the read watermark
    let re_added = store
        .add_participant(&conversation_id, "bob")
        .expect("Failed to re-add bob");
    assert_eq!(re_added.last_read_at, 5_000);
    assert_eq!(
        store
            .participants(&conversation_id)
            .expect("Failed to load participants")
            .len(),
        2
    );
}

#[test]
fn test_rejoin_after_leave_resets_watermark() {
    let (store, conversation_id) = store_with_conversation();

    store
        .mark_conversation_read_at(&conversation_id, "bob", 5_000)
        .expect("Failed to mark read");
    store
        .remove_participant(&conversation_id, "bob")
        .expect("Failed to remove bob");
    let rejoined = store
        .add_participant(&conversation_id, "bob")
        .expect("Failed to re-add bob");

    assert_eq!(rejoined.last_read_at, 0);
    assert_eq!(rejoined.role, ParticipantRole::Member);
}

#[tokio::test]
async fn test_removed_participant_is_not_a_member() {
    let (store, conversation_id) = store_with_conversation();

    assert!(store
        .participant(&conversation_id, "bob")
        .await
        .expect("Lookup failed")
        .is_some());

    store
        .remove_participant(&conversation_id, "bob")
        .expect("Failed to remove bob");

    assert!(store
        .participant(&conversation_id, "bob")
        .await
        .expect("Lookup failed")
        .is_none());
    assert!(store
        .conversations_for_user("bob")
        .await
        .expect("Query failed")
        .is_empty());
}

#[test]
fn test_remove_unknown_participant_fails() {
    let (store, conversation_id) = store_with_conversation();
    assert!(store.remove_participant(&conversation_id, "mallory").is_err());
}

#[test]
fn test_append_assigns_monotonic_ids_and_updates_preview() {
    let (store, conversation_id) = store_with_conversation();

    let first = store
        .append_message(&conversation_id, "alice", MessageBody::text("First"), None)
        .expect("Failed to append");
    let second = store
        .append_message(&conversation_id, "bob", MessageBody::text("Second"), None)
        .expect("Failed to append");
    assert!(second.id > first.id);
    assert!(second.created_at >= first.created_at);

    let conversation = store
        .conversation(&conversation_id)
        .expect("Failed to load conversation")
        .expect("Conversation missing");
    assert_eq!(conversation.last_message_at, Some(second.created_at));
    assert_eq!(conversation.last_message_preview.as_deref(), Some("Second"));
    assert_eq!(conversation.updated_at, second.created_at);
}

#[test]
fn test_preview_truncates_long_text_and_names_files() {
    let (store, conversation_id) = store_with_conversation();

    let long_text = "x".repeat(PREVIEW_MAX_CHARS + 40);
    store
        .append_message(&conversation_id, "alice", MessageBody::text(long_text), None)
        .expect("Failed to append");
    let conversation = store
        .conversation(&conversation_id)
        .expect("Failed to load conversation")
        .expect("Conversation missing");
    let preview = conversation.last_message_preview.expect("Preview missing");
    assert_eq!(preview.chars().count(), PREVIEW_MAX_CHARS + 1);
    assert!(preview.ends_with('…'));

    store
        .append_message(
            &conversation_id,
            "alice",
            MessageBody::File {
                name: "quote.pdf".to_string(),
                url: "https://files.internal/quote.pdf".to_string(),
            },
            None,
        )
        .expect("Failed to append");
    let conversation = store
        .conversation(&conversation_id)
        .expect("Failed to load conversation")
        .expect("Conversation missing");
    assert_eq!(
        conversation.last_message_preview.as_deref(),
        Some("File: quote.pdf")
    );
}

#[test]
fn test_append_rejects_non_participants_and_unknown_conversations() {
    let (store, conversation_id) = store_with_conversation();

    assert!(store
        .append_message(&conversation_id, "mallory", MessageBody::text("hi"), None)
        .is_err());
    assert!(store
        .append_message("no-such-conversation", "alice", MessageBody::text("hi"), None)
        .is_err());
}

#[test]
fn test_reply_must_target_same_conversation() {
    let (store, conversation_id) = store_with_conversation();
    let other = store
        .create_conversation(ConversationKind::Direct, None, None, None, "alice")
        .expect("Failed to create conversation");
    let elsewhere = store
        .append_message(&other.id, "alice", MessageBody::text("elsewhere"), None)
        .expect("Failed to append");

    // Cross-conversation reply is rejected
    assert!(store
        .append_message(
            &conversation_id,
            "alice",
            MessageBody::text("reply"),
            Some(elsewhere.id),
        )
        .is_err());
    // Nonexistent target is rejected
    assert!(store
        .append_message(&conversation_id, "alice", MessageBody::text("reply"), Some(9_999))
        .is_err());

    // Same-conversation reply is accepted
    let original = store
        .append_message(&conversation_id, "alice", MessageBody::text("original"), None)
        .expect("Failed to append");
    let reply = store
        .append_message(
            &conversation_id,
            "bob",
            MessageBody::text("reply"),
            Some(original.id),
        )
        .expect("Failed to append reply");
    assert_eq!(reply.reply_to, Some(original.id));
}

#[test]
fn test_unread_counts_follow_the_watermark_and_exclude_own_messages() {
    let (store, conversation_id) = store_with_conversation();

    store
        .append_message_at(&conversation_id, "alice", MessageBody::text("one"), None, 1_000)
        .expect("Failed to append");
    store
        .append_message_at(&conversation_id, "alice", MessageBody::text("two"), None, 2_000)
        .expect("Failed to append");
    store
        .append_message_at(&conversation_id, "alice", MessageBody::text("three"), None, 3_000)
        .expect("Failed to append");

    // Bob has three unread; Alice authored them all, so she has none
    assert_eq!(store.unread_count(&conversation_id, "bob").expect("Count failed"), 3);
    assert_eq!(store.unread_count(&conversation_id, "alice").expect("Count failed"), 0);

    // Reading up to the last message clears the count
    store
        .mark_conversation_read_at(&conversation_id, "bob", 3_000)
        .expect("Failed to mark read");
    assert_eq!(store.unread_count(&conversation_id, "bob").expect("Count failed"), 0);

    // Only strictly newer messages count again
    store
        .append_message_at(&conversation_id, "alice", MessageBody::text("four"), None, 4_000)
        .expect("Failed to append");
    assert_eq!(store.unread_count(&conversation_id, "bob").expect("Count failed"), 1);
}

#[test]
fn test_mark_read_never_regresses() {
    let (store, conversation_id) = store_with_conversation();

    store
        .append_message_at(&conversation_id, "alice", MessageBody::text("one"), None, 2_000)
        .expect("Failed to append");
    store
        .mark_conversation_read_at(&conversation_id, "bob", 5_000)
        .expect("Failed to mark read");

    // A stale tab marking an older point in time must not bring messages back
    store
        .mark_conversation_read_at(&conversation_id, "bob", 1_000)
        .expect("Failed to mark read");
    assert_eq!(store.unread_count(&conversation_id, "bob").expect("Count failed"), 0);
}

#[test]
fn test_edit_keeps_identity_and_order() {
    let (store, conversation_id) = store_with_conversation();

    let first = store
        .append_message_at(&conversation_id, "alice", MessageBody::text("first"), None, 1_000)
        .expect("Failed to append");
    store
        .append_message_at(&conversation_id, "alice", MessageBody::text("second"), None, 2_000)
        .expect("Failed to append");

    store
        .edit_message(first.id, MessageBody::text("first, reworded"))
        .expect("Failed to edit");

    let messages = store.messages(&conversation_id).expect("Failed to load messages");
    assert_eq!(messages.len(), 2);
    // Still first: created_at and id are untouched by edits
    assert_eq!(messages[0].id, first.id);
    assert_eq!(messages[0].created_at, 1_000);
    assert!(messages[0].edited);
    assert!(messages[0].edited_at.is_some());
    assert_eq!(messages[0].body, MessageBody::text("first, reworded"));
    assert!(!messages[1].edited);
}

#[test]
fn test_soft_deleted_messages_keep_their_row_and_still_count() {
    let (store, conversation_id) = store_with_conversation();

    let message = store
        .append_message_at(&conversation_id, "alice", MessageBody::text("oops"), None, 1_000)
        .expect("Failed to append");
    store.delete_message(message.id).expect("Failed to delete");

    let messages = store.messages(&conversation_id).expect("Failed to load messages");
    assert_eq!(messages.len(), 1);
    assert!(messages[0].deleted);
    assert!(messages[0].deleted_at.is_some());

    // The deleted flag is presentation state; the unread math is unchanged
    assert_eq!(store.unread_count(&conversation_id, "bob").expect("Count failed"), 1);
}

#[test]
fn test_message_order_breaks_timestamp_ties_by_id() {
    let (store, conversation_id) = store_with_conversation();

    let a = store
        .append_message_at(&conversation_id, "alice", MessageBody::text("a"), None, 1_000)
        .expect("Failed to append");
    let b = store
        .append_message_at(&conversation_id, "bob", MessageBody::text("b"), None, 1_000)
        .expect("Failed to append");

    let messages = store.messages(&conversation_id).expect("Failed to load messages");
    assert_eq!(messages[0].id, a.id);
    assert_eq!(messages[1].id, b.id);
}

#[tokio::test]
async fn test_conversations_for_user_reports_per_conversation_unread() {
    let store = SqliteStore::new_in_memory().expect("Failed to create store");

    let first = store
        .create_conversation(ConversationKind::Direct, None, None, None, "alice")
        .expect("Failed to create conversation");
    store.add_participant(&first.id, "bob").expect("Failed to add bob");
    let second = store
        .create_conversation(ConversationKind::Group, Some("Launch".to_string()), None, None, "carol")
        .expect("Failed to create conversation");
    store.add_participant(&second.id, "bob").expect("Failed to add bob");

    for at in [1_000, 2_000] {
        store
            .append_message_at(&first.id, "alice", MessageBody::text("ping"), None, at)
            .expect("Failed to append");
    }
    for at in [1_000, 2_000, 3_000] {
        store
            .append_message_at(&second.id, "carol", MessageBody::text("ping"), None, at)
            .expect("Failed to append");
    }

    let mut summaries = store
        .conversations_for_user("bob")
        .await
        .expect("Query failed");
    summaries.sort_by(|a, b| a.unread_count.cmp(&b.unread_count));

    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].conversation_id, first.id);
    assert_eq!(summaries[0].unread_count, 2);
    assert_eq!(summaries[1].conversation_id, second.id);
    assert_eq!(summaries[1].unread_count, 3);

    // A conversation with no messages still shows up, with zero unread
    let idle = store
        .create_conversation(ConversationKind::Direct, None, None, None, "bob")
        .expect("Failed to create conversation");
    let summaries = store
        .conversations_for_user("bob")
        .await
        .expect("Query failed");
    assert_eq!(summaries.len(), 3);
    let idle_summary = summaries
        .iter()
        .find(|s| s.conversation_id == idle.id)
        .expect("Idle conversation missing");
    assert_eq!(idle_summary.unread_count, 0);
}

#[test]
fn test_sqlite_store_persists_across_reopen() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("huddle.db");

    let conversation_id = {
        let store = SqliteStore::new(&path).expect("Failed to create store");
        let conversation = store
            .create_conversation(ConversationKind::Group, Some("Persistent".to_string()), None, None, "alice")
            .expect("Failed to create conversation");
        store
            .append_message(&conversation.id, "alice", MessageBody::text("survives"), None)
            .expect("Failed to append");
        conversation.id
    };

    let reopened = SqliteStore::new(&path).expect("Failed to reopen store");
    let conversation = reopened
        .conversation(&conversation_id)
        .expect("Failed to load conversation")
        .expect("Conversation missing after reopen");
    assert_eq!(conversation.name.as_deref(), Some("Persistent"));
    let messages = reopened
        .messages(&conversation_id)
        .expect("Failed to load messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, MessageBody::text("survives"));
}

#[test]
fn test_from_settings_creates_storage_directory() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut settings = crate::config::Settings::default();
    settings.storage_path = dir
        .path()
        .join("nested")
        .to_string_lossy()
        .into_owned();

    let store = SqliteStore::from_settings(&settings).expect("Failed to create store");
    store
        .create_conversation(ConversationKind::Direct, None, None, None, "alice")
        .expect("Failed to create conversation");
    assert!(dir.path().join("nested").join("huddle.db").exists());
}

// Memory store parity for the paths sessions depend on

#[tokio::test]
async fn test_memory_store_unread_and_membership_parity() {
    let store = MemoryStore::new();
    let conversation = store
        .create_conversation(ConversationKind::Direct, None, None, None, "alice")
        .expect("Failed to create conversation");
    store
        .add_participant(&conversation.id, "bob")
        .expect("Failed to add bob");

    store
        .append_message_at(&conversation.id, "alice", MessageBody::text("one"), None, 1_000)
        .expect("Failed to append");
    store
        .append_message_at(&conversation.id, "bob", MessageBody::text("two"), None, 2_000)
        .expect("Failed to append");

    assert_eq!(store.unread_count(&conversation.id, "bob").expect("Count failed"), 1);
    assert_eq!(store.unread_count(&conversation.id, "alice").expect("Count failed"), 1);

    store
        .mark_conversation_read_at(&conversation.id, "bob", 2_000)
        .expect("Failed to mark read");
    assert_eq!(store.unread_count(&conversation.id, "bob").expect("Count failed"), 0);

    store
        .remove_participant(&conversation.id, "bob")
        .expect("Failed to remove bob");
    assert!(store
        .participant(&conversation.id, "bob")
        .await
        .expect("Lookup failed")
        .is_none());
}

#[test]
fn test_memory_store_validates_replies_and_senders() {
    let store = MemoryStore::new();
    let conversation = store
        .create_conversation(ConversationKind::Direct, None, None, None, "alice")
        .expect("Failed to create conversation");

    assert!(store
        .append_message(&conversation.id, "mallory", MessageBody::text("hi"), None)
        .is_err());

    let other = store
        .create_conversation(ConversationKind::Direct, None, None, None, "alice")
        .expect("Failed to create conversation");
    let elsewhere = store
        .append_message(&other.id, "alice", MessageBody::text("elsewhere"), None)
        .expect("Failed to append");
    assert!(store
        .append_message(&conversation.id, "alice", MessageBody::text("re"), Some(elsewhere.id))
        .is_err());
}
