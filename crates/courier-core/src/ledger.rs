//! Persistent dedup ledger.
//!
//! Records idempotency keys whose send was confirmed, with the time and
//! action, in the `idempotentHistory` slot. A key is suppressed while its
//! age is below the window of its TTL class. Entries expire lazily: every
//! suppression check garbage-collects the slot first, which also keeps the
//! stored document bounded.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::config::DedupConfig;
use crate::keys::{IdempotencyKey, TtlClass};
use crate::payload::Action;
use crate::store::{KeyValueStore, load_json, remove_slot, save_json, slot};

/// One confirmed send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Epoch ms of confirmation
    #[serde(default)]
    pub ts: u64,
    #[serde(default)]
    pub action: Action,
}

type History = BTreeMap<String, LedgerEntry>;

/// TTL-indexed record of confirmed keys.
#[derive(Clone)]
pub struct DedupLedger {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: DedupConfig,
}

impl std::fmt::Debug for DedupLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupLedger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DedupLedger {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, config: DedupConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    fn is_live(&self, entry: &LedgerEntry, ttl: TtlClass, now_ms: u64) -> bool {
        let window_ms = u64::try_from(ttl.window(&self.config).as_millis()).unwrap_or(u64::MAX);
        now_ms.saturating_sub(entry.ts) < window_ms
    }

    /// Whether `key` was confirmed within the window of `ttl`.
    pub fn is_suppressed(&self, key: &IdempotencyKey, ttl: TtlClass) -> bool {
        self.collect_expired();
        let history: History = load_json(self.store.as_ref(), slot::HISTORY);
        let now_ms = self.clock.now_ms();
        history
            .get(key.as_str())
            .is_some_and(|entry| self.is_live(entry, ttl, now_ms))
    }

    /// Record a confirmed send of `key`.
    pub fn record(&self, key: &IdempotencyKey, action: &Action) {
        let mut history: History = load_json(self.store.as_ref(), slot::HISTORY);
        history.insert(
            key.as_str().to_string(),
            LedgerEntry {
                ts: self.clock.now_ms(),
                action: action.clone(),
            },
        );
        save_json(self.store.as_ref(), slot::HISTORY, &history);
        debug!(key = %key, action = %action, "Recorded confirmed send");
    }

    /// Drop entries older than the window of their own action's TTL class.
    /// Returns how many were removed.
    pub fn collect_expired(&self) -> usize {
        let history: History = load_json(self.store.as_ref(), slot::HISTORY);
        let now_ms = self.clock.now_ms();
        let before = history.len();
        let live: History = history
            .into_iter()
            .filter(|(_, entry)| self.is_live(entry, TtlClass::for_action(&entry.action), now_ms))
            .collect();
        let removed = before - live.len();
        save_json(self.store.as_ref(), slot::HISTORY, &live);
        if removed > 0 {
            debug!(removed, remaining = live.len(), "Collected expired ledger entries");
        }
        removed
    }

    /// Snapshot of the stored entries, expired ones included.
    #[must_use]
    pub fn entries(&self) -> BTreeMap<String, LedgerEntry> {
        load_json(self.store.as_ref(), slot::HISTORY)
    }

    /// Forget every recorded key.
    pub fn clear(&self) {
        remove_slot(self.store.as_ref(), slot::HISTORY);
    }
}
