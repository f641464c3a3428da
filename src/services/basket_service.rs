//! Per-case basket cache.
//!
//! The [`BasketCache`] keeps the last fetched basket of recently viewed cases.
//! Every fetch is stamped with the instant it was issued, and a response is
//! only stored if it was issued at or after the stamp currently held for its
//! case. An older response arriving late is dropped.
//!
//! Invalidating a case marks its basket stale and raises the floor so that
//! requests issued before the invalidation can no longer write. The stale
//! basket stays readable as last-known-good until a newer fetch lands.

use std::num::NonZeroUsize;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;

use crate::domain::{Basket, CaseId, MailableItem};
use crate::providers::api::{ApiResult, MailApi};

/// Default number of cases kept in memory.
pub const DEFAULT_CAPACITY: usize = 32;

/// A basket request in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub case_id: CaseId,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    basket: Option<Basket>,
    /// Responses issued before this instant are dropped.
    floor: DateTime<Utc>,
    stale: bool,
}

impl Entry {
    fn empty(floor: DateTime<Utc>) -> Self {
        Self {
            basket: None,
            floor,
            stale: false,
        }
    }

    fn accepts(&self, issued_at: DateTime<Utc>) -> bool {
        let stored = self.basket.as_ref().map(|basket| basket.fetched_at);
        issued_at >= self.floor && stored.map_or(true, |stored| issued_at >= stored)
    }
}

/// Cached baskets keyed by case, least recently used evicted first.
#[derive(Debug)]
pub struct BasketCache {
    entries: LruCache<CaseId, Entry>,
    last_issued: DateTime<Utc>,
}

impl Default for BasketCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BasketCache {
    /// Creates a cache holding up to `capacity` cases (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            last_issued: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// The cached basket, without touching the network.
    pub fn get(&self, case_id: CaseId) -> Option<&Basket> {
        self.entries.peek(&case_id).and_then(|entry| entry.basket.as_ref())
    }

    /// Whether the case was invalidated after its basket was fetched.
    pub fn is_stale(&self, case_id: CaseId) -> bool {
        self.entries.peek(&case_id).map_or(false, |entry| entry.stale)
    }

    /// Whether a fetch is needed to serve the case.
    pub fn needs_fetch(&self, case_id: CaseId, force: bool) -> bool {
        force || self.get(case_id).is_none() || self.is_stale(case_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stamps a new request for a case.
    ///
    /// Stamps are strictly increasing even if the clock stalls or steps back.
    pub fn begin_fetch(&mut self, case_id: CaseId) -> FetchTicket {
        FetchTicket {
            case_id,
            issued_at: self.next_instant(),
        }
    }

    /// Stores a response if no newer request has already written or been
    /// invalidated past it. Returns whether the response was stored.
    pub fn complete_fetch(&mut self, ticket: FetchTicket, items: Vec<MailableItem>) -> bool {
        let entry = self
            .entries
            .get_or_insert_mut(ticket.case_id, || Entry::empty(DateTime::<Utc>::MIN_UTC));

        if !entry.accepts(ticket.issued_at) {
            tracing::debug!(
                case_id = %ticket.case_id,
                issued_at = %ticket.issued_at,
                "discarding basket response older than cached entry"
            );
            return false;
        }

        entry.basket = Some(Basket::new(ticket.case_id, items, ticket.issued_at));
        entry.stale = false;
        tracing::debug!(case_id = %ticket.case_id, "basket cached");
        true
    }

    /// Marks a case stale and rejects every request issued before now.
    pub fn invalidate(&mut self, case_id: CaseId) {
        let floor = self.next_instant();
        let entry = self
            .entries
            .get_or_insert_mut(case_id, || Entry::empty(floor));
        entry.floor = floor;
        entry.stale = entry.basket.is_some();
        tracing::debug!(case_id = %case_id, "basket invalidated");
    }

    /// Applies a local edit to a cached basket. Returns `None` if nothing is cached.
    pub fn apply_local<R>(
        &mut self,
        case_id: CaseId,
        edit: impl FnOnce(&mut Basket) -> R,
    ) -> Option<R> {
        self.entries
            .get_mut(&case_id)
            .and_then(|entry| entry.basket.as_mut())
            .map(edit)
    }

    /// Drops a case from the cache.
    pub fn evict(&mut self, case_id: CaseId) -> Option<Basket> {
        self.entries.pop(&case_id).and_then(|entry| entry.basket)
    }

    /// Returns the cached basket, fetching it unless it is cached, fresh
    /// and `force` is false.
    ///
    /// A failed fetch leaves the cache untouched. If a newer response won
    /// the race, the newer basket is returned.
    pub async fn fetch(
        &mut self,
        api: &dyn MailApi,
        case_id: CaseId,
        force: bool,
    ) -> ApiResult<Basket> {
        if !self.needs_fetch(case_id, force) {
            if let Some(basket) = self.get(case_id) {
                return Ok(basket.clone());
            }
        }

        let ticket = self.begin_fetch(case_id);
        let items = api.list_flagged_items(case_id).await?;
        let fetched_at = ticket.issued_at;
        self.complete_fetch(ticket, items.clone());

        Ok(self
            .get(case_id)
            .cloned()
            .unwrap_or_else(|| Basket::new(case_id, items, fetched_at)))
    }

    fn next_instant(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        self.last_issued = if now > self.last_issued {
            now
        } else {
            self.last_issued + Duration::nanoseconds(1)
        };
        self.last_issued
    }
}
