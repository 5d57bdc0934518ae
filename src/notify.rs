//! Desktop notification dispatch
//!
//! This module turns qualifying message events into at-most-one platform
//! notification each:
//! - [`Notifier`] - the injected platform capability (permission + show)
//! - [`NotificationDispatcher`] - per-session dedup and pending state
//! - [`LogNotifier`] - headless implementation that logs instead of popping
//!
//! The event channel redelivers; the dispatcher deduplicates by message id
//! for the whole session lifetime, so a redelivered event never produces a
//! second notification.

use crate::event::MessageEvent;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Platform notification permission state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    /// The user has not been asked yet
    Undecided,
    /// Notifications may be shown
    Granted,
    /// The user declined; never ask again, never show
    Denied,
}

/// A notification ready to hand to the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Short headline
    pub title: String,
    /// Preview line
    pub body: String,
    /// Platform dedup tag (the message id)
    pub tag: String,
}

impl Notification {
    /// Build the notification for an insert event
    pub fn for_event(event: &MessageEvent) -> Self {
        Self {
            title: format!("New message from {}", event.sender_id),
            body: event.body.preview(),
            tag: event.message_id.to_string(),
        }
    }
}

/// Injected platform notification capability
///
/// Implemented by the embedding shell (a desktop webview, a test fake).
/// `show` is fire-and-forget; failures are the implementation's to report
/// and the dispatcher's to log.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Current permission state
    fn permission(&self) -> PermissionState;

    /// Ask the user for permission; resolves to the new state
    async fn request_permission(&self) -> Result<PermissionState>;

    /// Show a notification
    fn show(&self, notification: &Notification) -> Result<()>;
}

/// Notifier for headless embeddings: permission is always granted and
/// notifications are written to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn request_permission(&self) -> Result<PermissionState> {
        Ok(PermissionState::Granted)
    }

    fn show(&self, notification: &Notification) -> Result<()> {
        info!("[notification] {}: {}", notification.title, notification.body);
        Ok(())
    }
}

/// Per-session notification state machine
///
/// Starts idle; a qualifying event arms it (and shows a platform
/// notification when permitted); mark-as-read clears it back to idle.
/// The `seen` set lives for the whole session: once a message id produced
/// a notification, redeliveries of the same id never produce another.
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    enabled: bool,
    seen: HashSet<i64>,
    armed: Option<i64>,
    permission_requested: bool,
}

impl NotificationDispatcher {
    /// Create an idle dispatcher for a new session
    pub fn new(notifier: Arc<dyn Notifier>, enabled: bool) -> Self {
        Self {
            notifier,
            enabled,
            seen: HashSet::new(),
            armed: None,
            permission_requested: false,
        }
    }

    /// Request platform permission if it is still undecided
    ///
    /// Called once when the session starts, never per message; a second
    /// call on the same dispatcher is a no-op.
    pub async fn request_permission(&mut self) {
        if self.permission_requested {
            return;
        }
        self.permission_requested = true;

        if self.notifier.permission() != PermissionState::Undecided {
            return;
        }
        match self.notifier.request_permission().await {
            Ok(state) => debug!("Notification permission resolved to {:?}", state),
            Err(e) => warn!("Notification permission request failed: {}", e),
        }
    }

    /// Offer a qualifying event; returns whether a notification was shown
    ///
    /// Duplicate message ids leave the state unchanged and show nothing.
    /// Muted conversations and disabled notifications still record the id,
    /// so a later unmute cannot resurface an old message.
    pub fn offer(&mut self, event: &MessageEvent, muted: bool) -> bool {
        if self.seen.contains(&event.message_id) {
            debug!(
                "Suppressing duplicate notification for message {}",
                event.message_id
            );
            return false;
        }
        self.seen.insert(event.message_id);
        self.armed = Some(event.message_id);

        if !self.enabled || muted {
            return false;
        }
        if self.notifier.permission() != PermissionState::Granted {
            return false;
        }

        let notification = Notification::for_event(event);
        match self.notifier.show(&notification) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to show notification: {}", e);
                false
            }
        }
    }

    /// Clear the pending notification (mark-as-read, dismissal); idempotent
    pub fn clear(&mut self) {
        self.armed = None;
    }

    /// Whether a notification is pending clear
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Message id of the pending notification, if any
    pub fn armed_message(&self) -> Option<i64> {
        self.armed
    }
}
