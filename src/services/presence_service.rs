//! Bridge agent presence and sending accounts.
//!
//! Agents never hold a connection open; they report a heartbeat every few
//! minutes. The [`PresenceService`] polls the agent and account lists and
//! keeps the last good snapshot. Liveness is never stored: every read
//! compares each agent's last heartbeat with the current time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};

use crate::config::{PollingSettings, PresenceSettings};
use crate::domain::{is_online, BridgeAgent, SendingAccount};
use crate::providers::api::{ApiResult, MailApi};

/// Agents and accounts as of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub agents: Vec<BridgeAgent>,
    pub accounts: Vec<SendingAccount>,
    pub fetched_at: DateTime<Utc>,
}

/// Liveness of one agent at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentPresence {
    pub agent: BridgeAgent,
    pub online: bool,
    /// Time since the last heartbeat.
    pub silence: chrono::Duration,
}

impl PresenceSnapshot {
    /// Liveness of every agent at `now`.
    pub fn presence(&self, now: DateTime<Utc>, window: chrono::Duration) -> Vec<AgentPresence> {
        self.agents
            .iter()
            .map(|agent| AgentPresence {
                agent: agent.clone(),
                online: is_online(agent.last_seen_at, now, window),
                silence: agent.silence(now),
            })
            .collect()
    }

    /// Whether at least one agent can pick up handoffs.
    pub fn any_online(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.agents
            .iter()
            .any(|agent| is_online(agent.last_seen_at, now, window))
    }

    pub fn active_accounts(&self) -> impl Iterator<Item = &SendingAccount> {
        self.accounts.iter().filter(|account| account.active)
    }
}

/// Polls bridge agents and sending accounts.
///
/// # Example
///
/// ```ignore
/// let service = Arc::new(PresenceService::new(api, &settings.presence, &settings.polling));
/// let mut updates = service.subscribe();
/// Arc::clone(&service).start_watching();
/// while let Ok(snapshot) = updates.recv().await {
///     println!("{} agents online", snapshot.presence(Utc::now(), service.online_window()).len());
/// }
/// ```
pub struct PresenceService {
    api: Arc<dyn MailApi>,
    window: chrono::Duration,
    interval: Duration,
    snapshot: RwLock<Option<PresenceSnapshot>>,
    stop_flag: AtomicBool,
    event_sender: broadcast::Sender<PresenceSnapshot>,
}

impl PresenceService {
    pub fn new(
        api: Arc<dyn MailApi>,
        presence: &PresenceSettings,
        polling: &PollingSettings,
    ) -> Self {
        let (event_sender, _) = broadcast::channel(16);
        Self {
            api,
            window: presence.online_window(),
            interval: polling.presence_interval(),
            snapshot: RwLock::new(None),
            stop_flag: AtomicBool::new(true),
            event_sender,
        }
    }

    pub fn online_window(&self) -> chrono::Duration {
        self.window
    }

    /// Snapshots published by the watcher.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceSnapshot> {
        self.event_sender.subscribe()
    }

    /// The last good snapshot, if any poll has succeeded.
    pub async fn snapshot(&self) -> Option<PresenceSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Whether an agent is online right now.
    pub fn is_online(&self, agent: &BridgeAgent) -> bool {
        is_online(agent.last_seen_at, Utc::now(), self.window)
    }

    /// Fetches agents and accounts, optionally resyncing accounts with the
    /// mail host first.
    ///
    /// A failed poll keeps the previous snapshot.
    pub async fn poll(&self, force_resync: bool) -> ApiResult<PresenceSnapshot> {
        let (agents, accounts) = futures::try_join!(
            self.api.list_bridge_agents(),
            self.api.list_sending_accounts(force_resync)
        )?;

        let snapshot = PresenceSnapshot {
            agents,
            accounts,
            fetched_at: Utc::now(),
        };
        *self.snapshot.write().await = Some(snapshot.clone());
        let _ = self.event_sender.send(snapshot.clone());

        tracing::debug!(
            agents = snapshot.agents.len(),
            accounts = snapshot.accounts.len(),
            "presence polled"
        );
        Ok(snapshot)
    }

    /// Starts polling in the background until [`stop_watching`](Self::stop_watching).
    pub fn start_watching(self: Arc<Self>) {
        if !self.stop_flag.swap(false, Ordering::SeqCst) {
            return;
        }

        let service = Arc::clone(&self);
        tokio::spawn(async move {
            loop {
                if service.stop_flag.load(Ordering::SeqCst) {
                    break;
                }

                if let Err(e) = service.poll(false).await {
                    tracing::warn!(error = %e, "presence poll failed");
                }

                tokio::time::sleep(service.interval).await;
            }
            tracing::debug!("presence watcher stopped");
        });
    }

    pub fn stop_watching(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_watching(&self) -> bool {
        !self.stop_flag.load(Ordering::SeqCst)
    }
}
