//! Bridge agents and heartbeat-derived presence.
//!
//! An agent reports a heartbeat every [`heartbeat_interval`]. The server
//! keeps only the last-seen time; whether an agent is online is computed at
//! read time and never stored.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::AgentId;

/// Seconds between heartbeats of a healthy agent.
pub const HEARTBEAT_INTERVAL_SECS: i64 = 5 * 60;

/// Seconds after the last heartbeat an agent still counts as online.
///
/// One missed heartbeat plus slack for clock and network skew.
pub const ONLINE_WINDOW_SECS: i64 = 7 * 60;

/// How often an agent is expected to report.
pub fn heartbeat_interval() -> Duration {
    Duration::seconds(HEARTBEAT_INTERVAL_SECS)
}

/// How long after the last heartbeat an agent still counts as online.
pub fn online_window() -> Duration {
    Duration::seconds(ONLINE_WINDOW_SECS)
}

/// A desktop program that injects handoffs into a local mail client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeAgent {
    pub id: AgentId,
    pub machine_name: String,
    pub os_user: String,
    pub last_seen_at: DateTime<Utc>,
}

impl BridgeAgent {
    /// Whether the agent reported within [`online_window`] of `now`.
    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        is_online(self.last_seen_at, now, online_window())
    }

    /// Time since the last heartbeat, clamped at zero.
    pub fn silence(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_seen_at).max(Duration::zero())
    }
}

/// Pure liveness check: `now - last_seen < window`.
///
/// A heartbeat stamped slightly in the future (clock skew) counts as online.
pub fn is_online(last_seen_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    now - last_seen_at < window
}
