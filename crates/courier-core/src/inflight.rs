//! In-flight coordinator.
//!
//! Closes the race between two callers that derive the same idempotency key
//! before the first one's network attempt settles: the second caller joins
//! the first caller's pending outcome instead of starting its own attempt.
//!
//! ```text
//! acquire_or_join(k) ──► entry for k? ──yes──► clone of the shared handle
//!                              │
//!                              no ──► start() ─► Shared ─► cleanup task
//!                                                          (settle + delay,
//!                                                           then remove k)
//! ```
//!
//! Entries linger for `cleanup_delay` after settling so back-to-back
//! duplicate triggers (double clicks) still coalesce, but never longer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, warn};

use crate::keys::IdempotencyKey;

/// Handle to an attempt's eventual outcome; every clone resolves to the
/// same value.
pub type PendingOutcome<T> = Shared<BoxFuture<'static, T>>;

/// Whether the caller started the attempt or joined an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started,
    Joined,
}

type Entries<T> = Arc<Mutex<HashMap<IdempotencyKey, PendingOutcome<T>>>>;

/// Map of keys to pending attempts.
pub struct InFlightCoordinator<T: Clone> {
    entries: Entries<T>,
    cleanup_delay: Duration,
}

impl<T: Clone> std::fmt::Debug for InFlightCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightCoordinator")
            .field("entries", &lock(&self.entries).len())
            .field("cleanup_delay", &self.cleanup_delay)
            .finish()
    }
}

fn lock<T: Clone>(
    entries: &Entries<T>,
) -> MutexGuard<'_, HashMap<IdempotencyKey, PendingOutcome<T>>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> InFlightCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(cleanup_delay: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            cleanup_delay,
        }
    }

    /// Join the pending attempt for `key`, or start one with `start`.
    ///
    /// `start` is only invoked when no attempt for `key` is registered.
    /// Must be called from within a Tokio runtime for the cleanup task;
    /// outside one, the attempt runs uncoordinated.
    pub fn acquire_or_join<F, Fut>(
        &self,
        key: &IdempotencyKey,
        start: F,
    ) -> (PendingOutcome<T>, Admission)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut entries = lock(&self.entries);
        if let Some(pending) = entries.get(key) {
            debug!(key = %key, "Joining in-flight attempt");
            return (pending.clone(), Admission::Joined);
        }

        let pending = start().boxed().shared();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %key, "No runtime for in-flight cleanup; attempt is not coordinated");
            return (pending, Admission::Started);
        };
        entries.insert(key.clone(), pending.clone());
        drop(entries);

        let registry = Arc::clone(&self.entries);
        let delay = self.cleanup_delay;
        let key = key.clone();
        let tracked = pending.clone();
        // Also drives the attempt to completion if every caller drops out.
        handle.spawn(async move {
            let _ = tracked.clone().await;
            tokio::time::sleep(delay).await;
            let mut entries = lock(&registry);
            if entries.get(&key).is_some_and(|current| current.ptr_eq(&tracked)) {
                entries.remove(&key);
            }
        });

        (pending, Admission::Started)
    }

    /// Whether an attempt for `key` is registered.
    pub fn in_flight(&self, key: &IdempotencyKey) -> bool {
        lock(&self.entries).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
