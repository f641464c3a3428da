//! Application state management.
//!
//! View-facing state of the mail desk: reference data, the open compose
//! dialog and the visible notices. Basket and message data live in the
//! services and are read through [`MailDesk`](super::MailDesk).

use crate::domain::{InformationSource, MailTemplate, MessageId};
use crate::services::PreparationWorkflow;

use super::events::Notification;

/// Phase of the compose dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComposePhase {
    /// The user is choosing template, account and recipient.
    #[default]
    Editing,
    /// A preview render is in flight.
    Rendering,
    /// The handoff is being created.
    Submitting,
    /// The handoff exists; the confirmation is showing until the dialog closes.
    Confirmed { message_id: MessageId },
}

/// An open compose dialog.
#[derive(Debug, Clone)]
pub struct ComposeState {
    /// Distinguishes dialogs so late results for a closed one are ignored.
    pub session: u64,
    pub workflow: PreparationWorkflow,
    pub phase: ComposePhase,
}

/// Global desk state.
#[derive(Debug, Clone, Default)]
pub struct DeskState {
    /// Information sources, loaded once per session.
    pub sources: Vec<InformationSource>,
    /// Mail templates with their source tags.
    pub templates: Vec<MailTemplate>,
    /// The open compose dialog, if any.
    pub compose: Option<ComposeState>,
    /// Visible notifications, oldest first.
    pub notifications: Vec<Notification>,
    next_session: u64,
}

impl DeskState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a compose dialog, replacing any open one.
    pub fn open_compose(&mut self, workflow: PreparationWorkflow) -> u64 {
        self.next_session += 1;
        self.compose = Some(ComposeState {
            session: self.next_session,
            workflow,
            phase: ComposePhase::Editing,
        });
        self.next_session
    }

    /// The open dialog, if it is still the given session.
    pub fn compose_session(&mut self, session: u64) -> Option<&mut ComposeState> {
        self.compose.as_mut().filter(|compose| compose.session == session)
    }

    pub fn close_compose(&mut self) -> Option<ComposeState> {
        self.compose.take()
    }

    pub fn is_composing(&self) -> bool {
        self.compose.is_some()
    }

    pub fn push_notification(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    /// Removes a notification. Returns false if it was already gone.
    pub fn dismiss_notification(&mut self, id: &str) -> bool {
        let before = self.notifications.len();
        self.notifications.retain(|notification| notification.id != id);
        self.notifications.len() != before
    }

    /// Name of an information source, if known.
    pub fn source_name(&self, id: crate::domain::SourceId) -> Option<&str> {
        self.sources
            .iter()
            .find(|source| source.id == id)
            .map(|source| source.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CaseId, CaseMailConfig, SourceId};

    fn workflow() -> PreparationWorkflow {
        PreparationWorkflow::new(CaseId(1), None, vec![], vec![], &CaseMailConfig::default())
    }

    #[test]
    fn compose_sessions_are_distinct() {
        let mut state = DeskState::new();
        let first = state.open_compose(workflow());
        let second = state.open_compose(workflow());

        assert_ne!(first, second);
        assert!(state.compose_session(first).is_none());
        assert_eq!(state.compose_session(second).unwrap().phase, ComposePhase::Editing);

        assert!(state.close_compose().is_some());
        assert!(!state.is_composing());
    }

    #[test]
    fn notifications_dismiss_by_id() {
        let mut state = DeskState::new();
        let notice = Notification::info("Basket reset");
        let id = notice.id.clone();
        state.push_notification(notice);
        state.push_notification(Notification::error("Could not move item"));

        assert!(state.dismiss_notification(&id));
        assert!(!state.dismiss_notification(&id));
        assert_eq!(state.notifications.len(), 1);
    }

    #[test]
    fn source_names() {
        let mut state = DeskState::new();
        state.sources = vec![InformationSource::new(2, "Bank")];
        assert_eq!(state.source_name(SourceId(2)), Some("Bank"));
        assert_eq!(state.source_name(SourceId(3)), None);
    }
}
