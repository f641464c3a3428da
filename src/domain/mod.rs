//! Domain layer types for the mail dispatch coordinator.
//!
//! Items flagged for mail, their grouping into per-source baskets, outgoing
//! message handoffs with their lifecycle, bridge agents and sending accounts.

mod account;
mod basket;
mod bridge;
mod item;
mod message;
mod template;
mod types;

pub use account::{CaseMailConfig, SendingAccount};
pub use basket::{group, Basket, Group, GroupKey, UNASSIGNED_GROUP_NAME};
pub use bridge::{
    heartbeat_interval, is_online, online_window, BridgeAgent, HEARTBEAT_INTERVAL_SECS,
    ONLINE_WINDOW_SECS,
};
pub use item::{InformationSource, ItemKey, ItemKind, MailableItem, ParseItemKeyError};
pub use message::{
    LifecycleError, LifecycleEvent, MessageStatus, NewOutgoingMessage, ObservedChange,
    OutgoingMessage,
};
pub use template::{
    candidate_templates, MailTemplate, RenderContext, RenderRequest, RenderedMail,
};
pub use types::{AccountId, AgentId, CaseId, ItemId, MessageId, SourceId, TemplateId};
