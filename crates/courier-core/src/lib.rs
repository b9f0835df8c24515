//! courier-core: reliable, idempotent event delivery to a remote collector
//!
//! Events (registrations, logins, test results) are sent over an unreliable
//! channel and must be recorded at most once under normal conditions and at
//! least once under failure, across restarts, double submissions and
//! concurrent sends.
//!
//! # Architecture
//!
//! ```text
//! caller ─► FastSender ─┬─► Transmitter (beacon / keepalive, best effort)
//!                       └─► Outbox (durable queue)
//!
//! start ─► Outbox::flush ─► DeliveryChannel ─┬─► DedupLedger (persistent, TTL)
//!                                            ├─► InFlightCoordinator (memory)
//!                                            └─► Transport (structured → opaque)
//! ```
//!
//! # Modules
//!
//! - `keys`: idempotency key derivation and TTL classes
//! - `ledger`: persistent dedup ledger with lazy expiry
//! - `inflight`: coalescing of concurrent sends for one key
//! - `channel`: one delivery attempt with fallback escalation
//! - `outbox`: durable retry queue flushed once per start
//! - `fast`: non-blocking send façade
//! - `score`: score reconciliation across partial retries
//! - `registration`: local registration bookkeeping
//! - `client`: the assembled caller API
//! - `payload`, `store`, `clock`, `transport`: data model and collaborators
//! - `config`, `logging`, `error`: ambient plumbing
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod channel;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod fast;
pub mod inflight;
pub mod keys;
pub mod ledger;
pub mod logging;
pub mod outbox;
pub mod payload;
pub mod registration;
pub mod score;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

pub use channel::DeliveryOutcome;
pub use client::Courier;
pub use error::{Error, Result, StorageError, TransportError};
pub use payload::{Action, EventPayload, Fields};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
