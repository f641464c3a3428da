//! Debounced saving of item notes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::domain::ItemKey;
use crate::providers::api::{ApiError, MailApi};

/// Outcome of a scheduled note write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteWrite {
    Saved(ItemKey),
    /// A later edit replaced this one before the quiet period ended.
    Superseded(ItemKey),
    Failed(ItemKey, ApiError),
}

/// Saves note edits once typing has paused.
///
/// Each edit restarts the quiet period for its item. Only the last edit in
/// a burst reaches the server. An item is tracked only until its last
/// scheduled write fires.
pub struct NoteDebouncer {
    api: Arc<dyn MailApi>,
    quiet: Duration,
    generations: Arc<Mutex<HashMap<ItemKey, Arc<AtomicU64>>>>,
}

impl NoteDebouncer {
    pub fn new(api: Arc<dyn MailApi>, quiet: Duration) -> Self {
        Self {
            api,
            quiet,
            generations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedules a write of `note`. The returned future resolves after the
    /// quiet period, writing only if no newer edit arrived meanwhile.
    pub fn schedule(&self, item: ItemKey, note: String) -> BoxFuture<'static, NoteWrite> {
        let counter = self.counter(item);
        let generation = counter.fetch_add(1, Ordering::SeqCst) + 1;
        let deadline = tokio::time::Instant::now() + self.quiet;
        let api = Arc::clone(&self.api);
        let generations = Arc::clone(&self.generations);

        async move {
            tokio::time::sleep_until(deadline).await;
            if counter.load(Ordering::SeqCst) != generation {
                return NoteWrite::Superseded(item);
            }
            {
                let mut generations = lock(&*generations);
                if generations
                    .get(&item)
                    .map_or(false, |current| Arc::ptr_eq(current, &counter))
                {
                    generations.remove(&item);
                }
            }

            match api.update_item_note(item, &note).await {
                Ok(()) => {
                    tracing::debug!(item = %item, "note saved");
                    NoteWrite::Saved(item)
                }
                Err(e) => {
                    tracing::warn!(item = %item, error = %e, "note save failed");
                    NoteWrite::Failed(item, e)
                }
            }
        }
        .boxed()
    }

    /// Items with a write still waiting for its quiet period.
    pub fn tracked(&self) -> usize {
        lock(&*self.generations).len()
    }

    fn counter(&self, item: ItemKey) -> Arc<AtomicU64> {
        Arc::clone(lock(&*self.generations).entry(item).or_default())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
