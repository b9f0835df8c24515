//! Shared fixtures for courier-core integration tests.
//!
//! `CountingTransport` plays the collector: answers are scripted per call
//! and every network attempt is counted, so tests can assert how many
//! requests a scenario produced.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use courier_core::clock::{Clock, ManualClock};
use courier_core::config::Config;
use courier_core::error::TransportError;
use courier_core::payload::{Action, EventPayload, Fields};
use courier_core::store::{KeyValueStore, MemoryStore};
use courier_core::transport::{DeliveryRequest, Transmitter, Transport};
use courier_core::Courier;

/// 2023-11-14T22:13:20Z
pub const T0: u64 = 1_700_000_000_000;

/// Scripted answer for one structured call.
#[derive(Debug, Clone)]
pub enum Answer {
    Json(Value),
    Down,
}

#[derive(Debug, Default)]
pub struct CountingTransport {
    script: Mutex<VecDeque<Answer>>,
    opaque_script: Mutex<VecDeque<bool>>,
    pub structured: AtomicUsize,
    pub opaque: AtomicUsize,
    pub latency: Mutex<Option<Duration>>,
    pub bodies: Mutex<Vec<Value>>,
}

impl CountingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(latency: Duration) -> Arc<Self> {
        let transport = Self::default();
        *transport.latency.lock().unwrap() = Some(latency);
        Arc::new(transport)
    }

    pub fn answer(&self, answer: Answer) {
        self.script.lock().unwrap().push_back(answer);
    }

    /// Next send fails on both the structured and the opaque path.
    pub fn outage(&self) {
        self.answer(Answer::Down);
        self.opaque_script.lock().unwrap().push_back(false);
    }

    pub fn calls(&self) -> usize {
        self.structured.load(Ordering::SeqCst) + self.opaque.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for CountingTransport {
    async fn post_structured(&self, request: &DeliveryRequest) -> Result<Value, TransportError> {
        self.structured.fetch_add(1, Ordering::SeqCst);
        self.bodies.lock().unwrap().push(request.body.clone());
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let answer = self.script.lock().unwrap().pop_front();
        match answer {
            Some(Answer::Json(value)) => Ok(value),
            Some(Answer::Down) => Err(TransportError::Network("connection refused".into())),
            None => Ok(json!({"ok": true})),
        }
    }

    async fn post_opaque(&self, request: &DeliveryRequest) -> Result<(), TransportError> {
        self.opaque.fetch_add(1, Ordering::SeqCst);
        self.bodies.lock().unwrap().push(request.body.clone());
        let ok = self.opaque_script.lock().unwrap().pop_front().unwrap_or(true);
        if ok {
            Ok(())
        } else {
            Err(TransportError::Network("connection refused".into()))
        }
    }
}

/// Transmitter whose dispatches never reach anything.
#[derive(Debug, Default)]
pub struct NullTransmitter {
    pub dispatched: AtomicUsize,
}

impl Transmitter for NullTransmitter {
    fn beacon(&self, _request: &DeliveryRequest) -> bool {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn keepalive(&self, _request: &DeliveryRequest) -> Result<(), TransportError> {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Client {
    pub courier: Courier,
    pub transport: Arc<CountingTransport>,
    pub clock: ManualClock,
    pub store: Arc<dyn KeyValueStore>,
}

/// A courier over `store`, simulating one page load of the client.
pub fn client_on(store: Arc<dyn KeyValueStore>, transport: Arc<CountingTransport>) -> Client {
    let clock = ManualClock::new(T0);
    let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
    let courier = Courier::new(
        Config::default(),
        Arc::clone(&store),
        transport.clone(),
        Arc::new(NullTransmitter::default()),
        clock_dyn,
    );
    Client {
        courier,
        transport,
        clock,
        store,
    }
}

pub fn client() -> Client {
    client_on(Arc::new(MemoryStore::new()), CountingTransport::new())
}

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

pub fn test_result(test: &str, score: u32, total: u32) -> EventPayload {
    EventPayload::new(
        Action::TestResult,
        fields(json!({
            "userId": "user_42",
            "testName": test,
            "testDate": "2024-05-01",
            "score": score,
            "total": total,
        })),
    )
}

pub fn registration(email: &str) -> EventPayload {
    EventPayload::new(
        Action::Registration,
        fields(json!({"email": email, "firstName": "Ada"})),
    )
}
