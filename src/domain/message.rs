//! Outgoing message handoffs and their lifecycle.
//!
//! A message is prepared here but delivered by a bridge agent on another
//! machine. The client never pushes state to the bridge; it sees the bridge
//! pick a message up (`InOutlook`) or fail (`Error`) only by refetching.
//!
//! ```text
//!   create --> Draft --bridge ack--> InOutlook --complete--> Completed
//!                ^                    |    |
//!                +------retry---------+    +--fail(reason)--> Error
//!                ^                                              |
//!                +---------------------retry--------------------+
//! ```
//!
//! Cancelling deletes the record and is not a status transition. It does not
//! close a compose window the bridge has already opened.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::{AccountId, CaseId, MessageId, SourceId};

/// Lifecycle state of a handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting for a bridge agent to pick it up.
    Draft,
    /// Opened in the desktop mail client by the bridge.
    InOutlook,
    /// Sent from the desktop mail client.
    Completed,
    /// The bridge reported a failure.
    Error,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Draft => "draft",
            MessageStatus::InOutlook => "in_outlook",
            MessageStatus::Completed => "completed",
            MessageStatus::Error => "error",
        }
    }

    /// Applies an event, returning the next state.
    pub fn next(self, event: &LifecycleEvent) -> Result<MessageStatus, LifecycleError> {
        use LifecycleEvent::*;
        use MessageStatus::*;

        match (self, event) {
            (Draft, BridgeAck) => Ok(InOutlook),
            (InOutlook | Error, Retry) => Ok(Draft),
            (InOutlook, Complete) => Ok(Completed),
            (InOutlook, Fail { reason }) if reason.trim().is_empty() => {
                Err(LifecycleError::MissingReason)
            }
            (InOutlook, Fail { .. }) => Ok(Error),
            (from, event) => Err(LifecycleError::Rejected {
                from,
                event: event.name(),
            }),
        }
    }

    /// Whether no further event applies except retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Completed | MessageStatus::Error)
    }

    /// Classifies a status change seen between two refetches.
    ///
    /// Polling can miss intermediate states, so a `Draft` that shows up as
    /// `Completed` is accepted as having passed through `InOutlook` unseen.
    pub fn classify_observed(self, observed: MessageStatus) -> ObservedChange {
        use MessageStatus::*;

        match (self, observed) {
            (a, b) if a == b => ObservedChange::Unchanged,
            (Draft, InOutlook)
            | (InOutlook, Draft)
            | (InOutlook, Completed)
            | (InOutlook, Error)
            | (Error, Draft) => ObservedChange::Direct,
            (Draft, Completed) | (Draft, Error) | (Error, InOutlook) | (Error, Completed) => {
                ObservedChange::Implied
            }
            _ => ObservedChange::Impossible,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of comparing a cached status with a refetched one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedChange {
    Unchanged,
    /// A single legal transition.
    Direct,
    /// Several legal transitions, some of them between polls.
    Implied,
    /// No legal path; the server state is adopted anyway.
    Impossible,
}

/// Events that drive the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The bridge picked the message up. Observed, never sent by the client.
    BridgeAck,
    /// Re-queue for bridge pickup.
    Retry,
    /// The user confirms the message went out.
    Complete,
    /// The bridge reports a failure.
    Fail { reason: String },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::BridgeAck => "bridge_ack",
            LifecycleEvent::Retry => "retry",
            LifecycleEvent::Complete => "complete",
            LifecycleEvent::Fail { .. } => "fail",
        }
    }
}

/// A lifecycle event that does not apply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("cannot {event} a message in state {from}")]
    Rejected {
        from: MessageStatus,
        event: &'static str,
    },

    #[error("a failure needs a reason")]
    MissingReason,
}

/// A prepared message handed off to a bridge agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub id: MessageId,
    pub case_id: CaseId,
    pub source_id: Option<SourceId>,
    pub recipient_email: String,
    #[serde(default)]
    pub recipient_name: Option<String>,
    pub subject: String,
    pub body_html: String,
    pub account_id: AccountId,
    pub status: MessageStatus,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl OutgoingMessage {
    /// Applies a lifecycle event in place.
    ///
    /// Retry clears the error message; fail records the reason.
    pub fn apply(&mut self, event: &LifecycleEvent) -> Result<(), LifecycleError> {
        let next = self.status.next(event)?;
        match event {
            LifecycleEvent::Retry => self.error_message = None,
            LifecycleEvent::Fail { reason } => self.error_message = Some(reason.clone()),
            LifecycleEvent::BridgeAck | LifecycleEvent::Complete => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        self.status.next(&LifecycleEvent::Retry).is_ok()
    }

    pub fn can_complete(&self) -> bool {
        self.status.next(&LifecycleEvent::Complete).is_ok()
    }
}

/// Payload for creating a handoff. The server assigns id and `Draft` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOutgoingMessage {
    pub case_id: CaseId,
    pub source_id: Option<SourceId>,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub subject: String,
    pub body_html: String,
    pub account_id: AccountId,
}

impl NewOutgoingMessage {
    /// The message as it exists right after creation.
    pub fn into_draft(self, id: MessageId) -> OutgoingMessage {
        OutgoingMessage {
            id,
            case_id: self.case_id,
            source_id: self.source_id,
            recipient_email: self.recipient_email,
            recipient_name: self.recipient_name,
            subject: self.subject,
            body_html: self.body_html,
            account_id: self.account_id,
            status: MessageStatus::Draft,
            error_message: None,
        }
    }
}
