//! Crate-level error type.
//!
//! Every coordinator command returns [`DeskError`]. Nothing here is fatal:
//! each variant maps to a message the user can read and act on.

use thiserror::Error;

use crate::domain::{CaseId, ItemKey, LifecycleError, MessageId};
use crate::providers::api::ApiError;
use crate::services::ValidationError;

/// Shown when the server gave no usable explanation.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

/// Errors surfaced by the mail desk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeskError {
    /// A backend call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A local precondition was not met; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A lifecycle event does not apply to the message's current state.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("basket for case {0} is not loaded")]
    BasketNotLoaded(CaseId),

    #[error("{item} is not in the basket for case {case_id}")]
    UnknownItem { case_id: CaseId, item: ItemKey },

    #[error("message {0} is not loaded")]
    UnknownMessage(MessageId),

    #[error("no handoff is being prepared")]
    NoCompose,
}

impl DeskError {
    /// Text for a user-visible error notice.
    ///
    /// Server failures show the server's own detail when it sent one, and a
    /// generic fallback otherwise. Local failures describe themselves.
    pub fn user_message(&self) -> String {
        match self {
            DeskError::Api(err) => err
                .detail()
                .map(str::to_string)
                .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string()),
            other => other.to_string(),
        }
    }
}

/// Result type for desk operations.
pub type DeskResult<T> = Result<T, DeskError>;
