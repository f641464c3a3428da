//! Core identifier types for domain entities.
//!
//! The backend hands out integer primary keys for every record. These
//! newtype wrappers keep a case id from being passed where a source id is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

record_id!(
    /// Identifier of a case (the parent property transaction).
    CaseId
);

record_id!(
    /// Identifier of an information source (bank, agent, advisor, ...).
    SourceId
);

record_id!(
    /// Identifier of an activity or a document.
    ///
    /// Activities and documents live in separate tables, so an id is only
    /// unique together with its [`ItemKind`](super::ItemKind).
    ItemId
);

record_id!(
    /// Identifier of an outgoing message handoff.
    MessageId
);

record_id!(
    /// Identifier of a sending mail account.
    AccountId
);

record_id!(
    /// Identifier of a registered bridge agent.
    AgentId
);

record_id!(
    /// Identifier of a mail template.
    TemplateId
);
