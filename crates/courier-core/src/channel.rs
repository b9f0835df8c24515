//! Delivery channel: one logical send attempt with escalation.
//!
//! ```text
//! send(payload)
//!   ├─ derive key + TTL class
//!   ├─ ledger suppresses? ──► Deduped (no network)
//!   └─ acquire-or-join in-flight
//!        ├─ structured POST ─ 2xx JSON ────────► Delivered (+ ledger)
//!        │                  └ 2xx JSON, ok=false ► Rejected
//!        └─ transport failure ─► opaque POST ─ ok ► Opaque (+ ledger)
//!                                            └ err ► Failed
//! ```
//!
//! Primary and fallback never run in parallel. Nothing is written to the
//! ledger unless the collector was confirmed reached, so a failed or
//! rejected event is never suppressed on retry.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::inflight::{Admission, InFlightCoordinator};
use crate::keys::{IdempotencyKey, derive_key_with};
use crate::ledger::DedupLedger;
use crate::payload::{Action, EventPayload};
use crate::transport::{DeliveryRequest, Transport};

/// Result of [`DeliveryChannel::send`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Structured response received and accepted
    Delivered { key: IdempotencyKey, response: Value },
    /// Fallback request completed; the response could not be inspected
    Opaque { key: IdempotencyKey },
    /// Withheld: the key was confirmed within its window
    Deduped { key: IdempotencyKey },
    /// The collector answered but reported an application error
    Rejected { key: IdempotencyKey, response: Value },
    /// Neither transport completed
    Failed { key: IdempotencyKey },
}

impl DeliveryOutcome {
    #[must_use]
    pub fn key(&self) -> &IdempotencyKey {
        match self {
            Self::Delivered { key, .. }
            | Self::Opaque { key }
            | Self::Deduped { key }
            | Self::Rejected { key, .. }
            | Self::Failed { key } => key,
        }
    }

    /// Short label for logs and CLI output.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::Opaque { .. } => "opaque",
            Self::Deduped { .. } => "deduped",
            Self::Rejected { .. } => "rejected",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether the event is known to have reached the collector (now or
    /// within its dedup window).
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(
            self,
            Self::Delivered { .. } | Self::Opaque { .. } | Self::Deduped { .. }
        )
    }

    /// Whether retrying later could change the result.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The collector-facing view: the parsed response, a synthetic
    /// acknowledgement, or `null` on total failure.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Delivered { response, .. } | Self::Rejected { response, .. } => response.clone(),
            Self::Opaque { key } => json!({"ok": true, "opaque": true, "idempotencyKey": key}),
            Self::Deduped { .. } => json!({"ok": true, "deduped": true, "cached": true}),
            Self::Failed { .. } => Value::Null,
        }
    }
}

/// Whether a structured response reports an application-level failure.
#[must_use]
pub fn is_application_error(response: &Value) -> bool {
    response.get("ok") == Some(&Value::Bool(false))
        || response.get("status").and_then(Value::as_str) == Some("error")
}

/// Executes sends against the collector with dedup and coalescing.
#[derive(Clone)]
pub struct DeliveryChannel {
    transport: Arc<dyn Transport>,
    ledger: DedupLedger,
    inflight: Arc<InFlightCoordinator<DeliveryOutcome>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DeliveryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryChannel")
            .field("ledger", &self.ledger)
            .field("inflight", &self.inflight)
            .finish_non_exhaustive()
    }
}

impl DeliveryChannel {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        ledger: DedupLedger,
        inflight: Arc<InFlightCoordinator<DeliveryOutcome>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            ledger,
            inflight,
            clock,
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    #[must_use]
    pub fn inflight(&self) -> &InFlightCoordinator<DeliveryOutcome> {
        &self.inflight
    }

    /// Send one event. Never errors: every failure mode is an outcome.
    pub async fn send(&self, payload: &EventPayload) -> DeliveryOutcome {
        self.dispatch(payload, Some(&self.ledger)).await
    }

    /// Send a request whose answer the caller needs (a lookup rather than
    /// a record). Concurrent identical queries still share one attempt, but
    /// the ledger is neither consulted nor written.
    pub async fn query(&self, payload: &EventPayload) -> DeliveryOutcome {
        self.dispatch(payload, None).await
    }

    async fn dispatch(
        &self,
        payload: &EventPayload,
        ledger: Option<&DedupLedger>,
    ) -> DeliveryOutcome {
        let (key, ttl) = derive_key_with(payload, self.clock.as_ref());

        if ledger.is_some_and(|ledger| ledger.is_suppressed(&key, ttl)) {
            warn!(key = %key, action = %payload.action, "Duplicate send suppressed by ledger");
            return DeliveryOutcome::Deduped { key };
        }

        let transport = Arc::clone(&self.transport);
        let ledger = ledger.cloned();
        let action = payload.action.clone();
        let request = DeliveryRequest::new(payload, key.clone());
        let (pending, admission) = self
            .inflight
            .acquire_or_join(&key, move || attempt(transport, ledger, request, action));

        if admission == Admission::Joined {
            info!(key = %key, "Send already in flight, sharing its outcome");
        }
        pending.await
    }
}

async fn attempt(
    transport: Arc<dyn Transport>,
    ledger: Option<DedupLedger>,
    request: DeliveryRequest,
    action: Action,
) -> DeliveryOutcome {
    let key = request.key.clone();

    match transport.post_structured(&request).await {
        Ok(response) if is_application_error(&response) => {
            warn!(key = %key, action = %action, "Collector rejected event");
            return DeliveryOutcome::Rejected { key, response };
        }
        Ok(response) => {
            if let Some(ledger) = &ledger {
                ledger.record(&key, &action);
            }
            info!(key = %key, action = %action, outcome = "delivered", "Event delivered");
            return DeliveryOutcome::Delivered { key, response };
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Structured send failed, falling back to opaque mode");
        }
    }

    match transport.post_opaque(&request).await {
        Ok(()) => {
            if let Some(ledger) = &ledger {
                ledger.record(&key, &action);
            }
            info!(key = %key, action = %action, outcome = "opaque", "Event sent in opaque mode");
            DeliveryOutcome::Opaque { key }
        }
        Err(e) => {
            tracing::error!(key = %key, action = %action, error = %e, "Opaque send failed too");
            DeliveryOutcome::Failed { key }
        }
    }
}
