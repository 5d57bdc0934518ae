//! Event channel module
//!
//! This module carries message-insert events from the write path to live
//! client sessions:
//! - [`Topic`] - what a subscriber listens on
//! - [`EventChannel`] - the consumer-side subscribe/unsubscribe contract
//! - [`MessageBus`] - the in-process implementation
//!
//! Delivery guarantees are deliberately weak: at-least-once per subscriber,
//! ordered per subscriber only. Consumers deduplicate by message id and
//! never assume an event was filtered for them.

use crate::event::MessageEvent;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Logical topic a subscriber listens on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every message insert in the system
    MessageInserts,
    /// Message inserts in conversations the given user belongs to
    ///
    /// Served from the write path's participant set, so the stream arrives
    /// pre-filtered; sessions still run their own membership check.
    UserInbox(String),
}

impl Topic {
    /// Inbox topic for one user (convenience method)
    pub fn user_inbox(user_id: impl Into<String>) -> Self {
        Self::UserInbox(user_id.into())
    }
}

/// Opaque identifier of one open subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
    topic: Topic,
}

/// One open subscription: an unsubscribe handle plus the event stream
pub struct Subscription {
    /// Handle to pass to [`EventChannel::unsubscribe`]
    pub handle: SubscriptionHandle,
    events: UnboundedReceiver<MessageEvent>,
}

impl Subscription {
    /// Receive the next event in subscription order
    ///
    /// Returns `None` once the channel dropped this subscriber.
    pub async fn recv(&mut self) -> Option<MessageEvent> {
        self.events.recv().await
    }

    /// Non-blocking receive, for drain loops and shutdown paths
    pub fn try_recv(&mut self) -> Option<MessageEvent> {
        self.events.try_recv().ok()
    }
}

/// Consumer-side contract of the event channel
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Open a subscription on `topic`
    async fn subscribe(&self, topic: Topic) -> Result<Subscription>;

    /// Close the subscription behind `handle`; idempotent
    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()>;
}

type SubscriberMap = HashMap<Topic, Vec<(u64, UnboundedSender<MessageEvent>)>>;

/// In-process event bus
///
/// Fans every published event out to the global [`Topic::MessageInserts`]
/// subscribers and to the [`Topic::UserInbox`] of each participant handed
/// in by the write path. Disconnected subscribers are pruned on publish.
pub struct MessageBus {
    subscribers: Mutex<SubscriberMap>,
    next_id: AtomicU64,
}

impl MessageBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubscriberMap> {
        // A poisoned lock only means a sender panicked; the map is intact
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish one insert event
    ///
    /// # Arguments
    /// * `event` - The insert notification
    /// * `participants` - Members of the event's conversation, used to fan
    ///   out to their inbox topics
    ///
    /// # Returns
    /// Number of subscribers the event was handed to
    pub fn publish(&self, event: MessageEvent, participants: &[String]) -> usize {
        let mut subscribers = self.lock();
        let mut delivered = 0;

        delivered += deliver(&mut subscribers, &Topic::MessageInserts, &event);
        for user_id in participants {
            delivered += deliver(&mut subscribers, &Topic::user_inbox(user_id.clone()), &event);
        }

        debug!(
            "Published event for message {} in {} to {} subscribers",
            event.message_id, event.conversation_id, delivered
        );
        delivered
    }

    /// Number of open subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.lock().get(topic).map(Vec::len).unwrap_or(0)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Send `event` to every live subscriber of `topic`, pruning closed ones
fn deliver(subscribers: &mut SubscriberMap, topic: &Topic, event: &MessageEvent) -> usize {
    let Some(entries) = subscribers.get_mut(topic) else {
        return 0;
    };
    entries.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    let delivered = entries.len();
    if entries.is_empty() {
        subscribers.remove(topic);
    }
    delivered
}

#[async_trait]
impl EventChannel for MessageBus {
    async fn subscribe(&self, topic: Topic) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.lock().entry(topic.clone()).or_default().push((id, tx));
        debug!("Opened subscription {} on {:?}", id, topic);

        Ok(Subscription {
            handle: SubscriptionHandle { id, topic },
            events: rx,
        })
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()> {
        let mut subscribers = self.lock();
        if let Some(entries) = subscribers.get_mut(&handle.topic) {
            entries.retain(|(id, _)| *id != handle.id);
            if entries.is_empty() {
                subscribers.remove(&handle.topic);
            }
        }
        debug!("Closed subscription {} on {:?}", handle.id, handle.topic);
        Ok(())
    }
}
