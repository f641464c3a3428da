//! Application layer: the mail desk coordinator, its events and view state.

mod desk;
pub mod events;
pub mod state;

pub use desk::MailDesk;
pub use events::{AppEvent, EventBus, EventHandler, Notification, NotificationLevel, SubscriberId};
pub use state::{ComposePhase, ComposeState, DeskState};
