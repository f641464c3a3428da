//! Backend API trait and supporting types.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    BridgeAgent, CaseId, InformationSource, ItemKey, MailTemplate, MailableItem, MessageId,
    NewOutgoingMessage, OutgoingMessage, RenderRequest, RenderedMail, SendingAccount, SourceId,
};

/// Errors returned by backend calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The request never reached the server (DNS, TLS, timeout, refused).
    #[error("request failed: {0}")]
    Transport(String),

    /// The server answered with a non-2xx status.
    #[error("server returned HTTP {status}")]
    Status { status: u16, detail: Option<String> },

    /// The server answered 2xx but the body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-supplied message, if one could be parsed.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Status { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::Status {
                status: status.as_u16(),
                detail: None,
            }
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Result type for backend calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// The case-management backend as seen by the mail coordinator.
///
/// Mutating calls are expected to carry the session's CSRF token.
#[async_trait]
pub trait MailApi: Send + Sync {
    /// Activities of a case with "include in mail" set.
    async fn list_flagged_activities(&self, case_id: CaseId) -> ApiResult<Vec<MailableItem>>;

    /// Documents of a case with "include in mail" set.
    async fn list_flagged_documents(&self, case_id: CaseId) -> ApiResult<Vec<MailableItem>>;

    /// Both item lists, activities first. Fails if either request fails.
    async fn list_flagged_items(&self, case_id: CaseId) -> ApiResult<Vec<MailableItem>> {
        let (mut activities, documents) = futures::try_join!(
            self.list_flagged_activities(case_id),
            self.list_flagged_documents(case_id)
        )?;
        activities.extend(documents);
        Ok(activities)
    }

    /// All information sources.
    async fn list_information_sources(&self) -> ApiResult<Vec<InformationSource>>;

    /// Assigns an item to a source, or clears the assignment.
    async fn set_item_source(&self, item: ItemKey, source_id: Option<SourceId>) -> ApiResult<()>;

    /// Clears an item's "include in mail" flag.
    async fn clear_item_flag(&self, item: ItemKey) -> ApiResult<()>;

    /// Saves an item's free-text note.
    async fn update_item_note(&self, item: ItemKey, note: &str) -> ApiResult<()>;

    /// Clears "include in mail" on every item of a case.
    async fn reset_basket(&self, case_id: CaseId) -> ApiResult<()>;

    /// Creates a handoff in `Draft`.
    async fn create_message(&self, message: &NewOutgoingMessage) -> ApiResult<OutgoingMessage>;

    /// Handoffs of a case.
    async fn list_messages(&self, case_id: CaseId) -> ApiResult<Vec<OutgoingMessage>>;

    /// Re-queues a handoff for bridge pickup.
    async fn retry_message(&self, id: MessageId) -> ApiResult<OutgoingMessage>;

    /// Marks a handoff as sent.
    async fn mark_message_completed(&self, id: MessageId) -> ApiResult<OutgoingMessage>;

    /// Deletes a handoff.
    async fn delete_message(&self, id: MessageId) -> ApiResult<()>;

    /// Sending accounts, optionally resynced with the mail host first.
    async fn list_sending_accounts(&self, force_resync: bool) -> ApiResult<Vec<SendingAccount>>;

    /// Registered bridge agents with their last heartbeat.
    async fn list_bridge_agents(&self) -> ApiResult<Vec<BridgeAgent>>;

    /// Mail templates with their source tags.
    async fn list_templates(&self) -> ApiResult<Vec<MailTemplate>>;

    /// Renders a template for a case.
    async fn render_template(&self, request: &RenderRequest) -> ApiResult<RenderedMail>;
}
