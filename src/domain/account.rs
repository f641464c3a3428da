//! Sending accounts and per-case sender configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccountId;

/// A mailbox the bridge can send from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendingAccount {
    pub id: AccountId,
    /// Display name shown in pickers.
    pub name: String,
    pub email: String,
    /// Inactive accounts are listed but never picked automatically.
    pub active: bool,
    /// Last time the server synced this account with the mail host.
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Sender preferences stored on a case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseMailConfig {
    /// Account to send from, if the case names one.
    pub standard_account_id: Option<AccountId>,
    /// Sender address to match against active accounts.
    pub sender_email: Option<String>,
}

impl CaseMailConfig {
    /// Picks the account a new handoff should be sent from.
    ///
    /// Order: the configured standard account, then an active account whose
    /// address matches the configured sender (case-insensitively), then the
    /// first active account.
    pub fn resolve_account<'a>(
        &self,
        accounts: &'a [SendingAccount],
    ) -> Option<&'a SendingAccount> {
        let by_id = self
            .standard_account_id
            .and_then(|id| accounts.iter().find(|account| account.id == id));

        by_id
            .or_else(|| {
                let email = self.sender_email.as_deref()?.trim();
                accounts
                    .iter()
                    .filter(|account| account.active)
                    .find(|account| account.email.eq_ignore_ascii_case(email))
            })
            .or_else(|| accounts.iter().find(|account| account.active))
    }
}
