//! Durable retry queue.
//!
//! Raw payloads are appended to the `outbox` slot as they are handed to the
//! fast path and drained through the [`DeliveryChannel`] once per start. The
//! flush reads the queue once, sends items in order, and rewrites the slot at
//! the end with the failures (in their original order) followed by anything
//! enqueued while the flush was running.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{DeliveryChannel, DeliveryOutcome};
use crate::payload::EventPayload;
use crate::store::{KeyValueStore, load_json, save_json, slot};

/// Counters from one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub attempted: usize,
    pub delivered: usize,
    pub deduped: usize,
    /// Rejected by the collector or unreadable; removed from the queue
    pub dropped: usize,
    /// Still queued for the next flush
    pub retained: usize,
}

/// Ordered queue of payloads awaiting confirmed delivery.
pub struct Outbox {
    store: Arc<dyn KeyValueStore>,
    /// Serializes read-modify-write of the slot.
    queue_lock: Mutex<()>,
    /// Serializes whole flushes.
    flush_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox").finish_non_exhaustive()
    }
}

impl Outbox {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            queue_lock: Mutex::new(()),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn raw_items(&self) -> Vec<Value> {
        load_json(self.store.as_ref(), slot::OUTBOX)
    }

    /// Append a payload and persist immediately.
    pub fn enqueue(&self, payload: &EventPayload) {
        let item = match serde_json::to_value(payload) {
            Ok(item) => item,
            Err(e) => {
                warn!(action = %payload.action, error = %e, "Payload not encodable, not queued");
                return;
            }
        };
        let _guard = self.queue_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items = self.raw_items();
        items.push(item);
        save_json(self.store.as_ref(), slot::OUTBOX, &items);
        debug!(action = %payload.action, queued = items.len(), "Payload queued in outbox");
    }

    /// Queued payloads in order. Unreadable items are skipped.
    #[must_use]
    pub fn pending(&self) -> Vec<EventPayload> {
        self.raw_items()
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.raw_items().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send every queued payload once, keeping the ones that failed.
    pub async fn flush(&self, channel: &DeliveryChannel) -> FlushReport {
        let _flushing = self.flush_lock.lock().await;

        let snapshot = self.raw_items();
        if snapshot.is_empty() {
            debug!("Outbox empty, nothing to flush");
            return FlushReport::default();
        }

        let mut report = FlushReport {
            attempted: snapshot.len(),
            ..FlushReport::default()
        };
        let mut retained = Vec::new();

        for item in &snapshot {
            let payload: EventPayload = match serde_json::from_value(item.clone()) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "Dropping unreadable outbox item");
                    report.dropped += 1;
                    continue;
                }
            };
            match channel.send(&payload).await {
                DeliveryOutcome::Delivered { .. } | DeliveryOutcome::Opaque { .. } => {
                    report.delivered += 1;
                }
                DeliveryOutcome::Deduped { .. } => report.deduped += 1,
                DeliveryOutcome::Rejected { key, .. } => {
                    warn!(key = %key, "Collector rejected queued event, dropping it");
                    report.dropped += 1;
                }
                DeliveryOutcome::Failed { .. } => retained.push(item.clone()),
            }
        }

        {
            let _guard = self.queue_lock.lock().unwrap_or_else(PoisonError::into_inner);
            // Enqueue only appends, so anything past the snapshot arrived mid-flush.
            let appended = self.raw_items().into_iter().skip(snapshot.len());
            report.retained = retained.len();
            retained.extend(appended);
            save_json(self.store.as_ref(), slot::OUTBOX, &retained);
        }

        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            deduped = report.deduped,
            dropped = report.dropped,
            retained = report.retained,
            "Outbox flushed"
        );
        report
    }

    /// Run one flush after `delay` on the current runtime.
    pub fn spawn_startup_flush(
        self: &Arc<Self>,
        channel: DeliveryChannel,
        delay: Duration,
    ) -> JoinHandle<FlushReport> {
        let outbox = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            outbox.flush(&channel).await
        })
    }
}
