//! Optimistic reassignment of basket items between sources.
//!
//! Every move takes a fresh generation. A response only counts if it
//! carries the generation of the item's unresolved move; anything older is
//! dropped without committing or rolling back. While a move is unresolved
//! its target is re-applied on top of every refetched basket, so a refresh
//! that raced the persistence call cannot undo the optimistic edit.
//!
//! A removal or reset detaches the item's unresolved move instead of
//! forgetting it. If that edit fails, [`reinstate`](ReassignmentTracker::reinstate)
//! hands the move back: still in flight, committed, or to be rolled back.

use std::collections::HashMap;

use crate::domain::{Basket, CaseId, ItemKey, SourceId};

/// A move in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveTicket {
    pub case_id: CaseId,
    pub item: ItemKey,
    pub generation: u64,
    /// Source shown before the move; restored if the move fails.
    pub from: Option<SourceId>,
    pub to: Option<SourceId>,
}

/// What to do once a move's persistence call has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Persisted; invalidate and refetch the basket.
    Committed,
    /// Failed; the item must go back to this source.
    RolledBack { to: Option<SourceId> },
    /// A newer move or edit owns the item; ignore this response.
    Superseded,
}

#[derive(Debug, Clone, Copy)]
struct PendingMove {
    case_id: CaseId,
    generation: u64,
    from: Option<SourceId>,
    to: Option<SourceId>,
}

/// A move displaced by a removal or reset that has not resolved yet.
#[derive(Debug, Clone, Copy)]
struct DetachedMove {
    pending: PendingMove,
    succeeded: Option<bool>,
}

/// Tracks move generations and unresolved moves per item.
///
/// Entries only exist while something about the item is unresolved.
#[derive(Debug, Default)]
pub struct ReassignmentTracker {
    last_generation: u64,
    pending: HashMap<ItemKey, PendingMove>,
    detached: HashMap<ItemKey, DetachedMove>,
}

impl ReassignmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a move and returns its ticket.
    pub fn begin(
        &mut self,
        case_id: CaseId,
        item: ItemKey,
        from: Option<SourceId>,
        to: Option<SourceId>,
    ) -> MoveTicket {
        let generation = self.next_generation();
        self.pending.insert(
            item,
            PendingMove {
                case_id,
                generation,
                from,
                to,
            },
        );
        tracing::debug!(item = %item, generation, "move started");
        MoveTicket {
            case_id,
            item,
            generation,
            from,
            to,
        }
    }

    /// Detaches the unresolved move of an item, for edits that replace the
    /// item wholesale (removal, basket reset). Returns a fresh generation
    /// for the replacing edit.
    pub fn supersede(&mut self, item: ItemKey) -> u64 {
        if let Some(pending) = self.pending.remove(&item) {
            self.detached.insert(
                item,
                DetachedMove {
                    pending,
                    succeeded: None,
                },
            );
        }
        self.next_generation()
    }

    /// Resolves a move with the outcome of its persistence call.
    pub fn resolve(&mut self, ticket: &MoveTicket, succeeded: bool) -> MoveOutcome {
        let current = self
            .pending
            .get(&ticket.item)
            .map_or(false, |pending| pending.generation == ticket.generation);
        if !current {
            if let Some(detached) = self.detached.get_mut(&ticket.item) {
                if detached.pending.generation == ticket.generation {
                    detached.succeeded = Some(succeeded);
                }
            }
            tracing::debug!(
                item = %ticket.item,
                generation = ticket.generation,
                "discarding response from superseded move"
            );
            return MoveOutcome::Superseded;
        }

        self.pending.remove(&ticket.item);
        if succeeded {
            MoveOutcome::Committed
        } else {
            MoveOutcome::RolledBack { to: ticket.from }
        }
    }

    /// Gives back the move a failed removal or reset had detached.
    ///
    /// A move still in flight becomes pending again and `None` is returned.
    /// A move that resolved meanwhile is reported as committed or rolled back.
    pub fn reinstate(&mut self, item: ItemKey) -> Option<MoveOutcome> {
        let detached = self.detached.remove(&item)?;
        match detached.succeeded {
            None => {
                self.pending.insert(item, detached.pending);
                None
            }
            Some(true) => Some(MoveOutcome::Committed),
            Some(false) => Some(MoveOutcome::RolledBack {
                to: detached.pending.from,
            }),
        }
    }

    /// Drops what is known about an item that has left the basket.
    pub fn forget(&mut self, item: &ItemKey) {
        self.detached.remove(item);
    }

    /// Whether any move of the case is unresolved.
    pub fn has_pending(&self, case_id: CaseId) -> bool {
        self.pending.values().any(|pending| pending.case_id == case_id)
    }

    /// Items with pending or detached moves.
    pub fn tracked(&self) -> usize {
        self.pending.len() + self.detached.len()
    }

    /// Re-applies unresolved move targets to a freshly fetched basket.
    pub fn reapply(&self, basket: &mut Basket) {
        for (item, pending) in &self.pending {
            if pending.case_id == basket.case_id {
                basket.set_source(item, pending.to);
            }
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MailableItem;
    use chrono::Utc;

    const A: Option<SourceId> = Some(SourceId(1));
    const B: Option<SourceId> = Some(SourceId(2));
    const C: Option<SourceId> = Some(SourceId(3));

    fn item() -> ItemKey {
        ItemKey::activity(5)
    }

    #[test]
    fn generations_increase() {
        let mut tracker = ReassignmentTracker::new();
        let first = tracker.begin(CaseId(1), item(), A, B);
        let second = tracker.begin(CaseId(1), item(), B, C);
        let other = tracker.begin(CaseId(1), ItemKey::document(5), None, A);

        assert!(first.generation < second.generation);
        assert!(second.generation < other.generation);
    }

    #[test]
    fn stale_success_neither_commits_nor_rolls_back() {
        let mut tracker = ReassignmentTracker::new();
        let m1 = tracker.begin(CaseId(1), item(), A, B);
        let m2 = tracker.begin(CaseId(1), item(), A, C);

        assert_eq!(tracker.resolve(&m1, true), MoveOutcome::Superseded);
        assert!(tracker.has_pending(CaseId(1)));
        assert_eq!(tracker.resolve(&m2, true), MoveOutcome::Committed);
        assert!(!tracker.has_pending(CaseId(1)));
    }

    #[test]
    fn stale_failure_is_ignored_after_current_commit() {
        let mut tracker = ReassignmentTracker::new();
        let m1 = tracker.begin(CaseId(1), item(), A, B);
        let m2 = tracker.begin(CaseId(1), item(), A, C);

        assert_eq!(tracker.resolve(&m2, true), MoveOutcome::Committed);
        assert_eq!(tracker.resolve(&m1, false), MoveOutcome::Superseded);
    }

    #[test]
    fn current_failure_rolls_back_to_origin() {
        let mut tracker = ReassignmentTracker::new();
        let ticket = tracker.begin(CaseId(1), item(), A, B);
        assert_eq!(tracker.resolve(&ticket, false), MoveOutcome::RolledBack { to: A });
    }

    #[test]
    fn supersede_detaches_pending_move() {
        let mut tracker = ReassignmentTracker::new();
        let ticket = tracker.begin(CaseId(1), item(), A, B);
        assert!(tracker.supersede(item()) > ticket.generation);
        assert!(!tracker.has_pending(CaseId(1)));
        assert_eq!(tracker.resolve(&ticket, true), MoveOutcome::Superseded);

        tracker.forget(&item());
        assert_eq!(tracker.tracked(), 0);
        assert_eq!(tracker.reinstate(item()), None);
    }

    #[test]
    fn reinstated_failure_rolls_back_to_origin() {
        let mut tracker = ReassignmentTracker::new();
        let ticket = tracker.begin(CaseId(1), item(), A, B);
        tracker.supersede(item());

        assert_eq!(tracker.resolve(&ticket, false), MoveOutcome::Superseded);
        assert_eq!(tracker.reinstate(item()), Some(MoveOutcome::RolledBack { to: A }));
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn reinstated_move_in_flight_resolves_normally() {
        let mut tracker = ReassignmentTracker::new();
        let ticket = tracker.begin(CaseId(1), item(), A, B);
        tracker.supersede(item());

        assert_eq!(tracker.reinstate(item()), None);
        assert!(tracker.has_pending(CaseId(1)));
        assert_eq!(tracker.resolve(&ticket, true), MoveOutcome::Committed);
        assert_eq!(tracker.tracked(), 0);
    }

    #[test]
    fn reapply_overrides_refetched_source() {
        let mut tracker = ReassignmentTracker::new();
        tracker.begin(CaseId(1), item(), A, C);
        tracker.begin(CaseId(2), ItemKey::activity(6), A, B);

        let mut basket = Basket::new(
            CaseId(1),
            vec![
                MailableItem::activity(5, "moved").with_source(SourceId(1)),
                MailableItem::activity(6, "other case key").with_source(SourceId(1)),
            ],
            Utc::now(),
        );
        tracker.reapply(&mut basket);

        assert_eq!(basket.items[0].source_id, C);
        assert_eq!(basket.items[1].source_id, A);
    }
}
