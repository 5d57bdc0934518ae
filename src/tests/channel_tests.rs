// Channel Tests - the in-process bus and the subscription contract

use crate::channel::{EventChannel, MessageBus, Topic};
use crate::event::MessageEvent;
use crate::store::{ConversationKind, MemoryStore, MessageBody};
use std::sync::Arc;

fn event(message_id: i64, conversation_id: &str, sender_id: &str) -> MessageEvent {
    MessageEvent {
        message_id,
        conversation_id: conversation_id.to_string(),
        sender_id: sender_id.to_string(),
        body: MessageBody::text("hello"),
        created_at: 1_000 + message_id,
    }
}

#[tokio::test]
async fn test_publish_reaches_global_subscriber() {
    let bus = MessageBus::new();
    let mut subscription = bus
        .subscribe(Topic::MessageInserts)
        .await
        .expect("Failed to subscribe");

    let delivered = bus.publish(event(1, "c1", "alice"), &["alice".to_string(), "bob".to_string()]);
    assert_eq!(delivered, 1);

    let received = subscription.recv().await.expect("No event received");
    assert_eq!(received.message_id, 1);
    assert_eq!(received.conversation_id, "c1");
}

#[tokio::test]
async fn test_events_arrive_in_publish_order() {
    let bus = MessageBus::new();
    let mut subscription = bus
        .subscribe(Topic::MessageInserts)
        .await
        .expect("Failed to subscribe");

    for id in 1..=3 {
        bus.publish(event(id, "c1", "alice"), &[]);
    }

    for expected in 1..=3 {
        let received = subscription.recv().await.expect("No event received");
        assert_eq!(received.message_id, expected);
    }
}

#[tokio::test]
async fn test_fan_out_to_every_subscriber() {
    let bus = MessageBus::new();
    let mut first = bus
        .subscribe(Topic::MessageInserts)
        .await
        .expect("Failed to subscribe");
    let mut second = bus
        .subscribe(Topic::MessageInserts)
        .await
        .expect("Failed to subscribe");

    let delivered = bus.publish(event(1, "c1", "alice"), &[]);
    assert_eq!(delivered, 2);
    assert_eq!(first.recv().await.expect("No event").message_id, 1);
    assert_eq!(second.recv().await.expect("No event").message_id, 1);
}

#[tokio::test]
async fn test_user_inbox_only_sees_own_conversations() {
    let bus = MessageBus::new();
    let mut bob_inbox = bus
        .subscribe(Topic::user_inbox("bob"))
        .await
        .expect("Failed to subscribe");

    // Bob is a participant of c1 but not of c2
    bus.publish(event(1, "c1", "alice"), &["alice".to_string(), "bob".to_string()]);
    bus.publish(event(2, "c2", "carol"), &["carol".to_string(), "dave".to_string()]);

    let received = bob_inbox.try_recv().expect("No event for bob");
    assert_eq!(received.message_id, 1);
    assert!(bob_inbox.try_recv().is_none());
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent_and_stops_delivery() {
    let bus = MessageBus::new();
    let subscription = bus
        .subscribe(Topic::MessageInserts)
        .await
        .expect("Failed to subscribe");
    let handle = subscription.handle.clone();

    bus.unsubscribe(&handle).await.expect("Failed to unsubscribe");
    bus.unsubscribe(&handle).await.expect("Second unsubscribe failed");

    let delivered = bus.publish(event(1, "c1", "alice"), &[]);
    assert_eq!(delivered, 0);
    assert_eq!(bus.subscriber_count(&Topic::MessageInserts), 0);
}

#[tokio::test]
async fn test_dropped_receivers_are_pruned_on_publish() {
    let bus = MessageBus::new();
    let subscription = bus
        .subscribe(Topic::MessageInserts)
        .await
        .expect("Failed to subscribe");
    assert_eq!(bus.subscriber_count(&Topic::MessageInserts), 1);

    drop(subscription);
    let delivered = bus.publish(event(1, "c1", "alice"), &[]);
    assert_eq!(delivered, 0);
    assert_eq!(bus.subscriber_count(&Topic::MessageInserts), 0);
}

#[tokio::test]
async fn test_redelivery_surfaces_to_the_consumer() {
    // The contract is at-least-once: the same event may arrive twice and
    // consumers are the ones deduplicating
    let bus = MessageBus::new();
    let mut subscription = bus
        .subscribe(Topic::MessageInserts)
        .await
        .expect("Failed to subscribe");

    let duplicate = event(1, "c1", "alice");
    bus.publish(duplicate.clone(), &[]);
    bus.publish(duplicate.clone(), &[]);

    assert_eq!(subscription.recv().await.expect("No event").message_id, 1);
    assert_eq!(subscription.recv().await.expect("No event").message_id, 1);
}

#[tokio::test]
async fn test_store_append_publishes_to_global_and_inbox_topics() {
    let bus = Arc::new(MessageBus::new());
    let store = MemoryStore::with_bus(bus.clone());

    let mut global = bus
        .subscribe(Topic::MessageInserts)
        .await
        .expect("Failed to subscribe");
    let mut bob_inbox = bus
        .subscribe(Topic::user_inbox("bob"))
        .await
        .expect("Failed to subscribe");
    let mut carol_inbox = bus
        .subscribe(Topic::user_inbox("carol"))
        .await
        .expect("Failed to subscribe");

    let conversation = store
        .create_conversation(ConversationKind::Direct, None, None, None, "alice")
        .expect("Failed to create conversation");
    store
        .add_participant(&conversation.id, "bob")
        .expect("Failed to add bob");
    let message = store
        .append_message(&conversation.id, "alice", MessageBody::text("hi"), None)
        .expect("Failed to append");

    let on_global = global.recv().await.expect("No global event");
    assert_eq!(on_global.message_id, message.id);
    assert_eq!(on_global.sender_id, "alice");

    let on_bob = bob_inbox.recv().await.expect("No inbox event for bob");
    assert_eq!(on_bob.message_id, message.id);

    // Carol is not in the conversation; her inbox stays empty
    assert!(carol_inbox.try_recv().is_none());
}
