//! Collector transports.
//!
//! Two distinct kinds of operation reach the collector:
//!
//! - [`Transport`]: awaited requests. `post_structured` expects a JSON
//!   response; `post_opaque` is the permissive fallback whose response is
//!   never inspected.
//! - [`Transmitter`]: best-effort, non-cancelable, no-result dispatches that
//!   must survive the caller going away. Nothing is learned from them; the
//!   outbox is what makes delivery durable.
//!
//! [`HttpTransport`] implements both over `reqwest`.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::CollectorConfig;
use crate::error::{ConfigError, Result, TransportError};
use crate::keys::IdempotencyKey;
use crate::payload::EventPayload;

const JSON_CONTENT_TYPE: &str = "application/json";
const OPAQUE_CONTENT_TYPE: &str = "text/plain;charset=utf-8";

/// One request to the collector: the key plus the wire body that embeds it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
    pub key: IdempotencyKey,
    pub body: Value,
}

impl DeliveryRequest {
    #[must_use]
    pub fn new(payload: &EventPayload, key: IdempotencyKey) -> Self {
        let body = payload.wire_body(key.as_str());
        Self { key, body }
    }

    #[must_use]
    pub fn body_string(&self) -> String {
        self.body.to_string()
    }
}

/// Awaited collector requests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST the body as JSON and parse a JSON response.
    async fn post_structured(
        &self,
        request: &DeliveryRequest,
    ) -> std::result::Result<Value, TransportError>;

    /// POST the body in the opaque-tolerant mode. Success means the request
    /// was handed over and answered; the answer is not inspected.
    async fn post_opaque(
        &self,
        request: &DeliveryRequest,
    ) -> std::result::Result<(), TransportError>;
}

/// Fire-and-forget collector dispatches.
pub trait Transmitter: Send + Sync {
    /// Queue a background transmit that outlives the caller's runtime.
    /// Returns `false` when no such transmit can be queued.
    fn beacon(&self, request: &DeliveryRequest) -> bool;

    /// Dispatch a keepalive opaque transmit that tolerates the caller's
    /// teardown. Nothing is awaited.
    fn keepalive(&self, request: &DeliveryRequest) -> std::result::Result<(), TransportError>;
}

/// `reqwest`-backed transport for a single collector URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    header: HeaderName,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        let endpoint = Url::parse(config.endpoint.trim()).map_err(|e| {
            ConfigError::ValidationError(format!("collector.endpoint is not a URL: {e}"))
        })?;
        let header = HeaderName::from_bytes(config.idempotency_header.trim().as_bytes())
            .map_err(|e| {
                ConfigError::ValidationError(format!("collector.idempotency_header: {e}"))
            })?;
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            header,
            timeout: config.request_timeout(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn key_header(key: &IdempotencyKey) -> std::result::Result<HeaderValue, TransportError> {
        HeaderValue::from_str(&key.header_value())
            .map_err(|e| TransportError::InvalidResponse(format!("idempotency header: {e}")))
    }

    fn opaque_request(
        client: &Client,
        endpoint: &Url,
        header: &HeaderName,
        request: &DeliveryRequest,
    ) -> std::result::Result<reqwest::RequestBuilder, TransportError> {
        Ok(client
            .post(endpoint.clone())
            .header(CONTENT_TYPE, OPAQUE_CONTENT_TYPE)
            .header(header.clone(), Self::key_header(&request.key)?)
            .body(request.body_string()))
    }
}

fn network_error(e: &reqwest::Error) -> TransportError {
    TransportError::Network(e.to_string())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_structured(
        &self,
        request: &DeliveryRequest,
    ) -> std::result::Result<Value, TransportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header(self.header.clone(), Self::key_header(&request.key)?)
            .timeout(self.timeout)
            .body(request.body_string())
            .send()
            .await
            .map_err(|e| network_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }

    async fn post_opaque(
        &self,
        request: &DeliveryRequest,
    ) -> std::result::Result<(), TransportError> {
        let response = Self::opaque_request(&self.client, &self.endpoint, &self.header, request)?
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| network_error(&e))?;
        debug!(key = %request.key, status = response.status().as_u16(), "Opaque send answered");
        Ok(())
    }
}

/// Process-wide runtime for fire-and-forget dispatches. It is never shut
/// down, so a spawned transmit keeps running after the caller's runtime is
/// dropped. Holds its own client so no connection is tied to a caller's
/// runtime.
struct Detached {
    runtime: tokio::runtime::Runtime,
    client: Client,
}

static DETACHED: OnceLock<Option<Detached>> = OnceLock::new();

fn detached() -> Option<&'static Detached> {
    DETACHED
        .get_or_init(|| {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("courier-detached")
                .enable_all()
                .build();
            let runtime = match runtime {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!(error = %e, "Detached transmit runtime unavailable");
                    return None;
                }
            };
            let client = {
                let _entered = runtime.enter();
                Client::builder().build()
            };
            let client = match client {
                Ok(client) => client,
                Err(e) => {
                    warn!(error = %e, "Detached transmit client unavailable");
                    return None;
                }
            };
            Some(Detached { runtime, client })
        })
        .as_ref()
}

impl Transmitter for HttpTransport {
    fn beacon(&self, request: &DeliveryRequest) -> bool {
        let Some(owner) = detached() else {
            return false;
        };
        let builder = owner
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .timeout(self.timeout)
            .body(request.body_string());
        let key = request.key.clone();
        // Sent from inside the task so its timers belong to the detached runtime.
        owner.runtime.spawn(async move {
            if let Err(e) = builder.send().await {
                debug!(key = %key, error = %e, "Beacon transmit failed");
            }
        });
        true
    }

    fn keepalive(&self, request: &DeliveryRequest) -> std::result::Result<(), TransportError> {
        let owner = detached().ok_or_else(|| {
            TransportError::Unavailable("no detached runtime for keepalive".to_string())
        })?;
        let builder = Self::opaque_request(&owner.client, &self.endpoint, &self.header, request)?
            .timeout(self.timeout);
        let key = request.key.clone();
        owner.runtime.spawn(async move {
            if let Err(e) = builder.send().await {
                debug!(key = %key, error = %e, "Keepalive transmit failed");
            }
        });
        Ok(())
    }
}
