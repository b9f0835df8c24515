//! Fast-send façade.
//!
//! Returns to the caller without awaiting network I/O. The best-effort
//! transmit may or may not reach the collector; the payload is always
//! queued in the outbox, and the next startup flush settles it. Duplicates
//! produced that way are absorbed by the collector through the key.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::keys::derive_key_with;
use crate::outbox::Outbox;
use crate::payload::EventPayload;
use crate::transport::{DeliveryRequest, Transmitter};

/// Acknowledgement of a fast send. Says nothing about delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Queued {
    pub queued: bool,
}

impl Queued {
    const YES: Self = Self { queued: true };
}

/// Best-effort immediate transmit plus unconditional enqueue.
pub struct FastSender {
    transmitter: Arc<dyn Transmitter>,
    outbox: Arc<Outbox>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FastSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastSender")
            .field("outbox", &self.outbox)
            .finish_non_exhaustive()
    }
}

impl FastSender {
    #[must_use]
    pub fn new(
        transmitter: Arc<dyn Transmitter>,
        outbox: Arc<Outbox>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transmitter,
            outbox,
            clock,
        }
    }

    pub fn send_fast(&self, payload: &EventPayload) -> Queued {
        let (key, _) = derive_key_with(payload, self.clock.as_ref());
        let request = DeliveryRequest::new(payload, key);

        if self.transmitter.beacon(&request) {
            debug!(key = %request.key, "Beacon transmit queued");
        } else if let Err(e) = self.transmitter.keepalive(&request) {
            warn!(key = %request.key, error = %e, "Keepalive transmit not dispatched");
        } else {
            debug!(key = %request.key, "Keepalive transmit dispatched");
        }

        self.outbox.enqueue(payload);
        Queued::YES
    }
}
