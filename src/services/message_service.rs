//! Per-case handoff lists.
//!
//! The [`MessageBook`] holds the outgoing messages of each viewed case. The
//! server owns message status; the book learns about bridge pickups and
//! failures only by refreshing. Each refresh is numbered, and a list is
//! applied only if it is newer than the last one applied for the case, so
//! a slow response never rolls statuses back.

use std::collections::HashMap;

use crate::domain::{
    CaseId, LifecycleError, LifecycleEvent, MessageId, MessageStatus, ObservedChange,
    OutgoingMessage,
};

/// A message-list request in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListTicket {
    pub case_id: CaseId,
    pub seq: u64,
}

/// A status change noticed while applying a refreshed list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusObservation {
    pub case_id: CaseId,
    pub message_id: MessageId,
    pub from: MessageStatus,
    pub to: MessageStatus,
    pub change: ObservedChange,
    pub error_message: Option<String>,
}

impl StatusObservation {
    /// Short description for notices, e.g. "picked up by the bridge".
    pub fn describe(&self) -> &'static str {
        match self.to {
            MessageStatus::InOutlook => "picked up by the bridge",
            MessageStatus::Completed => "sent",
            MessageStatus::Error => "failed",
            MessageStatus::Draft => "queued for pickup again",
        }
    }
}

#[derive(Debug, Default)]
struct CaseMessages {
    messages: Vec<OutgoingMessage>,
    issued: u64,
    applied: u64,
    loaded: bool,
}

/// Outgoing messages by case.
#[derive(Debug, Default)]
pub struct MessageBook {
    cases: HashMap<CaseId, CaseMessages>,
}

impl MessageBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages of a case in server order. Empty if never loaded.
    pub fn messages(&self, case_id: CaseId) -> &[OutgoingMessage] {
        self.cases
            .get(&case_id)
            .map_or(&[][..], |case| case.messages.as_slice())
    }

    /// Whether a list for the case has been applied.
    pub fn is_loaded(&self, case_id: CaseId) -> bool {
        self.cases.get(&case_id).map_or(false, |case| case.loaded)
    }

    /// Finds a message in any loaded case.
    pub fn find(&self, id: MessageId) -> Option<&OutgoingMessage> {
        self.cases
            .values()
            .flat_map(|case| case.messages.iter())
            .find(|message| message.id == id)
    }

    /// Numbers a new refresh of a case.
    pub fn begin_refresh(&mut self, case_id: CaseId) -> ListTicket {
        let case = self.cases.entry(case_id).or_default();
        case.issued += 1;
        ListTicket {
            case_id,
            seq: case.issued,
        }
    }

    /// Applies a refreshed list and reports status changes.
    ///
    /// Returns `None` if a newer list (or a newer single-message update) was
    /// already applied.
    pub fn complete_refresh(
        &mut self,
        ticket: ListTicket,
        messages: Vec<OutgoingMessage>,
    ) -> Option<Vec<StatusObservation>> {
        let case = self.cases.entry(ticket.case_id).or_default();
        if ticket.seq <= case.applied {
            tracing::debug!(
                case_id = %ticket.case_id,
                seq = ticket.seq,
                applied = case.applied,
                "discarding stale message list"
            );
            return None;
        }

        let observations: Vec<StatusObservation> = messages
            .iter()
            .filter_map(|fresh| {
                let previous = case.messages.iter().find(|m| m.id == fresh.id)?;
                observe(ticket.case_id, previous, fresh)
            })
            .collect();

        case.messages = messages;
        case.applied = ticket.seq;
        case.loaded = true;
        Some(observations)
    }

    /// Stores a message returned by a mutating call.
    ///
    /// Refreshes issued before this point can no longer be applied.
    pub fn upsert(&mut self, message: OutgoingMessage) -> Option<StatusObservation> {
        let case_id = message.case_id;
        let case = self.cases.entry(case_id).or_default();
        case.applied = case.issued;

        match case.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                let observation = observe(case_id, existing, &message);
                *existing = message;
                observation
            }
            None => {
                case.messages.push(message);
                None
            }
        }
    }

    /// Drops a deleted message.
    pub fn remove(&mut self, case_id: CaseId, id: MessageId) -> Option<OutgoingMessage> {
        let case = self.cases.get_mut(&case_id)?;
        case.applied = case.issued;
        let index = case.messages.iter().position(|m| m.id == id)?;
        Some(case.messages.remove(index))
    }

    /// Checks a user-triggered event against the cached status.
    ///
    /// The server still has the final say; this only keeps obviously invalid
    /// requests off the wire.
    pub fn check(
        &self,
        id: MessageId,
        event: &LifecycleEvent,
    ) -> Option<Result<&OutgoingMessage, LifecycleError>> {
        let message = self.find(id)?;
        Some(message.status.next(event).map(|_| message))
    }
}

fn observe(
    case_id: CaseId,
    previous: &OutgoingMessage,
    fresh: &OutgoingMessage,
) -> Option<StatusObservation> {
    let change = previous.status.classify_observed(fresh.status);
    match change {
        ObservedChange::Unchanged => return None,
        ObservedChange::Impossible => tracing::warn!(
            case_id = %case_id,
            message_id = %fresh.id,
            from = %previous.status,
            to = %fresh.status,
            "server reported a status change with no legal path; adopting it"
        ),
        ObservedChange::Direct | ObservedChange::Implied => tracing::debug!(
            message_id = %fresh.id,
            from = %previous.status,
            to = %fresh.status,
            "message status changed"
        ),
    }

    Some(StatusObservation {
        case_id,
        message_id: fresh.id,
        from: previous.status,
        to: fresh.status,
        change,
        error_message: fresh.error_message.clone(),
    })
}
