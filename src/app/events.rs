//! Desk events and their subscribers.
//!
//! The desk publishes an [`AppEvent`] for every state change a view might
//! render: basket edits, rollbacks, message status changes and notices.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{CaseId, ItemKey, MessageId, MessageStatus, SourceId};

/// Events published by the mail desk.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    // Basket events
    /// A basket was (re)loaded from the server.
    BasketLoaded(CaseId),
    /// An item was moved to another source, optimistically.
    ItemMoved {
        case_id: CaseId,
        item: ItemKey,
        to: Option<SourceId>,
    },
    /// A failed move was reverted.
    MoveRolledBack {
        case_id: CaseId,
        item: ItemKey,
        to: Option<SourceId>,
    },
    /// An item left the basket.
    ItemRemoved { case_id: CaseId, item: ItemKey },
    /// A removed item came back after a failed removal.
    ItemRestored { case_id: CaseId, item: ItemKey },
    /// Every item was cleared from a basket.
    BasketReset(CaseId),
    /// A failed reset put the previous items back.
    ResetRolledBack(CaseId),

    // Message events
    /// A message list was (re)loaded.
    MessagesLoaded(CaseId),
    /// A message changed status on the server.
    MessageStatusChanged {
        case_id: CaseId,
        message_id: MessageId,
        from: MessageStatus,
        to: MessageStatus,
    },
    /// A message was deleted.
    MessageCancelled {
        case_id: CaseId,
        message_id: MessageId,
    },

    // Compose events
    /// A compose dialog was opened.
    ComposeOpened(CaseId),
    /// A fresh preview is ready.
    PreviewReady(CaseId),
    /// A handoff was created in `Draft`.
    HandoffCreated {
        case_id: CaseId,
        message_id: MessageId,
    },
    /// The compose dialog closed.
    ComposeClosed(CaseId),

    // UI events
    /// Show a notification.
    ShowNotification(Notification),
    /// Dismiss a notification.
    DismissNotification(String),
}

/// A user notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Random id used to dismiss the notice.
    pub id: String,
    pub title: String,
    /// Detail line, typically the server message.
    pub body: Option<String>,
    pub level: NotificationLevel,
    /// Milliseconds until the notice hides itself; `None` keeps it up.
    pub auto_dismiss_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl Notification {
    fn new(
        title: impl Into<String>,
        level: NotificationLevel,
        auto_dismiss_ms: Option<u64>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            body: None,
            level,
            auto_dismiss_ms,
        }
    }

    pub fn info(title: impl Into<String>) -> Self {
        Self::new(title, NotificationLevel::Info, Some(5000))
    }

    pub fn success(title: impl Into<String>) -> Self {
        Self::new(title, NotificationLevel::Success, Some(3000))
    }

    pub fn warning(title: impl Into<String>) -> Self {
        Self::new(title, NotificationLevel::Warning, Some(8000))
    }

    /// Errors stay until dismissed.
    pub fn error(title: impl Into<String>) -> Self {
        Self::new(title, NotificationLevel::Error, None)
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_auto_dismiss(mut self, ms: u64) -> Self {
        self.auto_dismiss_ms = Some(ms);
        self
    }

    pub fn persistent(mut self) -> Self {
        self.auto_dismiss_ms = None;
        self
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

pub type EventHandler = Box<dyn Fn(&AppEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    handlers: HashMap<u64, EventHandler>,
    next_id: u64,
}

/// Fan-out of [`AppEvent`]s to registered handlers.
///
/// Clones share subscribers. The lock only guards the subscriber list;
/// handlers run synchronously on the publishing task and must not publish.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for every event published from now on.
    pub fn subscribe<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&AppEvent) + Send + Sync + 'static,
    {
        let mut subscribers = self.lock();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.handlers.insert(id, Box::new(handler));
        SubscriberId(id)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.lock().handlers.remove(&id.0);
    }

    /// Calls every handler with the event, in no particular order.
    pub fn publish(&self, event: AppEvent) {
        let subscribers = self.lock();
        for handler in subscribers.handlers.values() {
            handler(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().handlers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
