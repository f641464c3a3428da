//! Business services layer.
//!
//! Services hold the coordinator's domain state and the rules for keeping it
//! consistent with a backend that other users and the bridge agents change
//! concurrently.
//!
//! # Architecture
//!
//! ```text
//! Application Layer (MailDesk, Events)
//!          |
//!          v
//!    Services Layer  <-- You are here
//!          |
//!          v
//!   Providers (MailApi)
//! ```
//!
//! # Services Overview
//!
//! - [`BasketCache`]: Per-case baskets with timestamp-gated writes
//! - [`ReassignmentTracker`]: Move generations and unresolved optimistic moves
//! - [`MessageBook`]: Per-case handoff lists with sequence-gated refreshes
//! - [`PresenceService`]: Bridge agent liveness and sending accounts
//! - [`PreparationWorkflow`]: Template, account and recipient selection for a handoff
//! - [`NoteDebouncer`]: Quiet-period saving of item notes

mod basket_service;
mod message_service;
mod note_service;
mod presence_service;
mod preparation_service;
mod reassignment_service;

pub use basket_service::{BasketCache, FetchTicket, DEFAULT_CAPACITY};
pub use message_service::{ListTicket, MessageBook, StatusObservation};
pub use note_service::{NoteDebouncer, NoteWrite};
pub use presence_service::{AgentPresence, PresenceService, PresenceSnapshot};
pub use preparation_service::{PreparationWorkflow, Preview, RenderTicket, ValidationError};
pub use reassignment_service::{MoveOutcome, MoveTicket, ReassignmentTracker};
