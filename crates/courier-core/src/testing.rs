//! Scripted transports and a failing store for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{StorageError, TransportError};
use crate::store::{KeyValueStore, MemoryStore};
use crate::transport::{DeliveryRequest, Transmitter, Transport};

/// Transport whose answers are queued up front. When a queue runs dry the
/// structured path answers `{"ok": true}` and the opaque path succeeds.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    structured: Mutex<VecDeque<Result<Value, TransportError>>>,
    opaque: Mutex<VecDeque<Result<(), TransportError>>>,
    pub structured_calls: AtomicUsize,
    pub opaque_calls: AtomicUsize,
    pub latency: Option<Duration>,
    pub requests: Mutex<Vec<DeliveryRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn push_structured(&self, answer: Result<Value, TransportError>) {
        self.structured.lock().unwrap().push_back(answer);
    }

    pub fn push_opaque(&self, answer: Result<(), TransportError>) {
        self.opaque.lock().unwrap().push_back(answer);
    }

    /// Make the next send fail on both paths.
    pub fn fail_next(&self) {
        self.push_structured(Err(TransportError::Network("down".into())));
        self.push_opaque(Err(TransportError::Network("down".into())));
    }

    pub fn network_calls(&self) -> usize {
        self.structured_calls.load(Ordering::SeqCst) + self.opaque_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post_structured(&self, request: &DeliveryRequest) -> Result<Value, TransportError> {
        self.structured_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let next = self.structured.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(json!({"ok": true})))
    }

    async fn post_opaque(&self, request: &DeliveryRequest) -> Result<(), TransportError> {
        self.opaque_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let next = self.opaque.lock().unwrap().pop_front();
        next.unwrap_or(Ok(()))
    }
}

/// Transmitter that records dispatches.
#[derive(Debug)]
pub struct RecordingTransmitter {
    pub beacon_available: AtomicBool,
    pub beacons: Mutex<Vec<DeliveryRequest>>,
    pub keepalives: Mutex<Vec<DeliveryRequest>>,
}

impl RecordingTransmitter {
    pub fn new(beacon_available: bool) -> Self {
        Self {
            beacon_available: AtomicBool::new(beacon_available),
            beacons: Mutex::new(Vec::new()),
            keepalives: Mutex::new(Vec::new()),
        }
    }
}

impl Transmitter for RecordingTransmitter {
    fn beacon(&self, request: &DeliveryRequest) -> bool {
        if !self.beacon_available.load(Ordering::SeqCst) {
            return false;
        }
        self.beacons.lock().unwrap().push(request.clone());
        true
    }

    fn keepalive(&self, request: &DeliveryRequest) -> Result<(), TransportError> {
        self.keepalives.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Memory-backed store whose reads or writes can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, reads: bool, writes: bool) {
        self.fail_reads.store(reads, Ordering::SeqCst);
        self.fail_writes.store(writes, Ordering::SeqCst);
    }

    fn refused(op: &str) -> StorageError {
        StorageError::Io {
            path: "flaky".to_string(),
            reason: format!("{op} refused"),
        }
    }
}

impl KeyValueStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::refused("read"));
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::refused("write"));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::refused("remove"));
        }
        self.inner.remove(key)
    }
}
