//! Client session lifecycle
//!
//! One [`SessionController`] per signed-in client. Starting it loads the
//! initial unread total and subscribes to message-insert events; from then
//! on a single task processes events strictly in arrival order: own
//! messages are dropped, membership is checked (failing closed), derived
//! state is updated, the notification dispatcher is fed, and the unread
//! total is re-queried. Stopping tears the task down and discards whatever
//! was in flight.

use crate::channel::{EventChannel, Subscription, SubscriptionHandle, Topic};
use crate::config::Settings;
use crate::event::MessageEvent;
use crate::membership::MembershipResolver;
use crate::notify::{NotificationDispatcher, Notifier};
use crate::store::Directory;
use crate::unread::UnreadAggregator;
use crate::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Derived per-session state exposed to the UI
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    /// Total unread messages across the user's conversations
    pub unread_count: u64,
    /// Whether a qualifying message arrived since the last mark-as-read
    pub has_new_messages: bool,
    /// The most recent qualifying message, if any
    pub latest_message: Option<MessageEvent>,
}

#[derive(Default)]
struct SessionState {
    unread_count: u64,
    has_new_messages: bool,
    latest_message: Option<MessageEvent>,
    /// Sequence number handed to the most recently issued unread load
    refresh_seq: u64,
    /// Sequence number of the most recently applied load result
    applied_seq: u64,
}

struct SessionRuntime {
    task: JoinHandle<()>,
    subscription: SubscriptionHandle,
}

impl Drop for SessionRuntime {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Live messaging session of one signed-in user
///
/// Owns the derived state (unread total, new-message flag, latest message)
/// and the per-session notification dispatcher. All event processing is
/// sequential; reads through [`SessionController::snapshot`] never block
/// it beyond a state mutex.
pub struct SessionController {
    user_id: String,
    channel: Arc<dyn EventChannel>,
    resolver: MembershipResolver,
    aggregator: UnreadAggregator,
    notifier: Arc<dyn Notifier>,
    settings: Settings,
    state: Arc<Mutex<SessionState>>,
    dispatcher: Arc<Mutex<NotificationDispatcher>>,
    runtime: Mutex<Option<SessionRuntime>>,
}

impl SessionController {
    /// Create a controller for `user_id`
    ///
    /// # Arguments
    /// * `channel` - Event channel to subscribe on
    /// * `directory` - Storage collaborator answering membership and unread
    ///   queries
    /// * `notifier` - Platform notification capability
    /// * `settings` - Notification switch and topic selection
    pub fn new(
        user_id: impl Into<String>,
        channel: Arc<dyn EventChannel>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        settings: Settings,
    ) -> Self {
        let dispatcher =
            NotificationDispatcher::new(notifier.clone(), settings.enable_notifications);
        Self {
            user_id: user_id.into(),
            channel,
            resolver: MembershipResolver::new(directory.clone()),
            aggregator: UnreadAggregator::new(directory),
            notifier,
            settings,
            state: Arc::new(Mutex::new(SessionState::default())),
            dispatcher: Arc::new(Mutex::new(dispatcher)),
            runtime: Mutex::new(None),
        }
    }

    /// The user this session belongs to
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Whether the session is currently running
    pub fn is_running(&self) -> bool {
        lock(&self.runtime).is_some()
    }

    /// Start the session
    ///
    /// Requests notification permission (once per start, only while
    /// undecided), subscribes to message-insert events and spawns the
    /// processing task, which loads the initial unread total and then
    /// handles events in arrival order. Events arriving before the initial
    /// load finishes simply queue and are processed right after it.
    ///
    /// # Errors
    /// `Error::Session` when the user id is empty or the session is
    /// already running; `Error::Channel` when the subscription cannot be
    /// opened.
    pub async fn start(&self) -> Result<()> {
        if self.user_id.is_empty() {
            return Err(Error::Session("Session user id must not be empty".to_string()));
        }
        if self.is_running() {
            return Err(Error::Session(format!(
                "Session for {} is already started",
                self.user_id
            )));
        }

        // Fresh dispatcher per session: the dedup set and the
        // permission-request latch must not survive a restart
        let mut dispatcher =
            NotificationDispatcher::new(self.notifier.clone(), self.settings.enable_notifications);
        dispatcher.request_permission().await;

        let topic = if self.settings.per_user_topics {
            Topic::user_inbox(self.user_id.clone())
        } else {
            Topic::MessageInserts
        };
        let subscription = match self.channel.subscribe(topic).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("Failed to subscribe session for {}: {}", self.user_id, e);
                return Err(e);
            }
        };
        let handle = subscription.handle.clone();

        {
            let mut runtime = lock(&self.runtime);
            if runtime.is_some() {
                // Lost a start/start race; release the extra subscription
                drop(runtime);
                let _ = self.channel.unsubscribe(&handle).await;
                return Err(Error::Session(format!(
                    "Session for {} is already started",
                    self.user_id
                )));
            }

            *lock(&self.state) = SessionState::default();
            *lock(&self.dispatcher) = dispatcher;

            let task = tokio::spawn(run_session(
                self.user_id.clone(),
                subscription,
                self.resolver.clone(),
                self.aggregator.clone(),
                self.dispatcher.clone(),
                self.state.clone(),
            ));
            *runtime = Some(SessionRuntime {
                task,
                subscription: handle,
            });
        }

        info!("Session started for {}", self.user_id);
        Ok(())
    }

    /// Stop the session
    ///
    /// Aborts the processing task (an in-flight unread refresh dies with
    /// it and is never applied) and closes the subscription. Safe to call
    /// on a session that never started or already stopped.
    pub async fn stop(&self) -> Result<()> {
        let runtime = lock(&self.runtime).take();
        let Some(runtime) = runtime else {
            debug!("Stop on a session for {} that is not running", self.user_id);
            return Ok(());
        };

        runtime.task.abort();
        if let Err(e) = self.channel.unsubscribe(&runtime.subscription).await {
            warn!("Unsubscribe failed while stopping {}: {}", self.user_id, e);
        }

        info!("Session stopped for {}", self.user_id);
        Ok(())
    }

    /// Clear the transient new-message state; idempotent
    ///
    /// Only the session-local flags fall: the durable read watermarks move
    /// when the user opens a conversation, through the store's write path.
    pub fn mark_as_read(&self) {
        {
            let mut state = lock(&self.state);
            state.has_new_messages = false;
            state.latest_message = None;
        }
        lock(&self.dispatcher).clear();
        debug!("Cleared new-message state for {}", self.user_id);
    }

    /// Current derived state for the UI
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = lock(&self.state);
        SessionSnapshot {
            unread_count: state.unread_count,
            has_new_messages: state.has_new_messages,
            latest_message: state.latest_message.clone(),
        }
    }

    /// Total unread messages (convenience accessor)
    pub fn unread_count(&self) -> u64 {
        lock(&self.state).unread_count
    }

    /// Whether a qualifying message arrived since the last mark-as-read
    pub fn has_new_messages(&self) -> bool {
        lock(&self.state).has_new_messages
    }

    /// Whether a notification is pending clear
    pub fn notification_pending(&self) -> bool {
        lock(&self.dispatcher).is_armed()
    }
}

/// Per-session processing loop: initial load, then events in order
async fn run_session(
    user_id: String,
    mut subscription: Subscription,
    resolver: MembershipResolver,
    aggregator: UnreadAggregator,
    dispatcher: Arc<Mutex<NotificationDispatcher>>,
    state: Arc<Mutex<SessionState>>,
) {
    refresh_unread(&user_id, &aggregator, &state).await;

    while let Some(event) = subscription.recv().await {
        process_event(&user_id, event, &resolver, &aggregator, &dispatcher, &state).await;
    }
    debug!("Event stream closed for {}", user_id);
}

/// Handle one insert event end to end
async fn process_event(
    user_id: &str,
    event: MessageEvent,
    resolver: &MembershipResolver,
    aggregator: &UnreadAggregator,
    dispatcher: &Arc<Mutex<NotificationDispatcher>>,
    state: &Arc<Mutex<SessionState>>,
) {
    // The session's own messages never count as new
    if event.sender_id == user_id {
        debug!(
            "Ignoring own message {} for {}",
            event.message_id, user_id
        );
        return;
    }

    // Membership filter; a failed lookup drops the event (fail closed)
    let participant = match resolver.lookup(&event.conversation_id, user_id).await {
        Ok(Some(participant)) => participant,
        Ok(None) => {
            debug!(
                "Dropping event {}: {} is not a member of {}",
                event.message_id, user_id, event.conversation_id
            );
            return;
        }
        Err(e) => {
            warn!(
                "Membership lookup failed for {} in {}: {}; dropping event",
                user_id, event.conversation_id, e
            );
            return;
        }
    };

    {
        let mut s = lock(state);
        s.has_new_messages = true;
        s.latest_message = Some(event.clone());
    }

    lock(dispatcher).offer(&event, participant.muted);

    refresh_unread(user_id, aggregator, state).await;
}

/// Re-query the aggregate unread total, discarding stale results
///
/// Every issued load takes the next sequence number; a result only lands
/// if no newer load has landed before it. A failed load keeps the
/// last-known count.
async fn refresh_unread(
    user_id: &str,
    aggregator: &UnreadAggregator,
    state: &Arc<Mutex<SessionState>>,
) {
    let seq = {
        let mut s = lock(state);
        s.refresh_seq += 1;
        s.refresh_seq
    };

    match aggregator.load(user_id).await {
        Ok(count) => {
            let mut s = lock(state);
            if seq > s.applied_seq {
                s.applied_seq = seq;
                s.unread_count = count;
            } else {
                debug!(
                    "Discarding stale unread result for {} (seq {} <= {})",
                    user_id, seq, s.applied_seq
                );
            }
        }
        Err(e) => {
            warn!(
                "Unread refresh failed for {}: {}; keeping last count",
                user_id, e
            );
        }
    }
}

/// Lock with poison recovery; state stays usable after a panicked writer
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ConversationUnread, Participant};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Directory whose unread loads are scripted: each call pops the next
    /// (delay, result) pair, sleeps, then answers
    struct ScriptedLoads {
        responses: Mutex<VecDeque<(u64, Result<u64>)>>,
    }

    impl ScriptedLoads {
        fn new(responses: Vec<(u64, Result<u64>)>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl Directory for ScriptedLoads {
        async fn participant(&self, _: &str, _: &str) -> Result<Option<Participant>> {
            Ok(None)
        }

        async fn conversations_for_user(&self, _: &str) -> Result<Vec<ConversationUnread>> {
            let next = lock(&self.responses).pop_front();
            let (delay_ms, result) = next.expect("Scripted directory ran out of responses");
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            result.map(|count| {
                vec![ConversationUnread {
                    conversation_id: "c1".to_string(),
                    unread_count: count,
                }]
            })
        }
    }

    #[tokio::test]
    async fn test_slow_stale_refresh_result_is_discarded() {
        // First load is slow and returns 10; second is instant and returns 3.
        // The slow result lands last but must not overwrite the newer one.
        let directory = Arc::new(ScriptedLoads::new(vec![(50, Ok(10)), (0, Ok(3))]));
        let aggregator = UnreadAggregator::new(directory);
        let state = Arc::new(Mutex::new(SessionState::default()));

        let first = refresh_unread("u1", &aggregator, &state);
        let second = refresh_unread("u1", &aggregator, &state);
        tokio::join!(first, second);

        let s = lock(&state);
        assert_eq!(s.unread_count, 3);
        assert_eq!(s.applied_seq, 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_known_count() {
        let directory = Arc::new(ScriptedLoads::new(vec![
            (0, Ok(5)),
            (0, Err(Error::Store("directory outage".to_string()))),
        ]));
        let aggregator = UnreadAggregator::new(directory);
        let state = Arc::new(Mutex::new(SessionState::default()));

        refresh_unread("u1", &aggregator, &state).await;
        assert_eq!(lock(&state).unread_count, 5);

        refresh_unread("u1", &aggregator, &state).await;
        let s = lock(&state);
        assert_eq!(s.unread_count, 5);
        // The failed load still consumed a sequence number but applied nothing
        assert_eq!(s.refresh_seq, 2);
        assert_eq!(s.applied_seq, 1);
    }
}
