//! Caller-facing API.
//!
//! [`Courier`] wires the store, clock and transports into the delivery
//! pipeline and exposes the operations the application calls. Event sends
//! go through the fast path and return immediately; the login check is the
//! one awaited call because its caller needs the collector's answer.

use std::sync::Arc;

use chrono::SecondsFormat;
use tokio::task::JoinHandle;
use tracing::info;

use crate::channel::{DeliveryChannel, DeliveryOutcome};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::fast::{FastSender, Queued};
use crate::inflight::InFlightCoordinator;
use crate::keys::{normalize_email, normalize_phone};
use crate::ledger::DedupLedger;
use crate::outbox::{FlushReport, Outbox};
use crate::payload::{Action, EventPayload, Fields, field};
use crate::registration::{Registrar, RegistrationForm, RegistrationOutcome, UserProfile};
use crate::score::ScoreLedger;
use crate::store::{KeyValueStore, MemoryStore};
use crate::transport::{HttpTransport, Transmitter, Transport};

/// The delivery subsystem, assembled.
pub struct Courier {
    config: Config,
    clock: Arc<dyn Clock>,
    channel: DeliveryChannel,
    outbox: Arc<Outbox>,
    fast: Arc<FastSender>,
    scores: ScoreLedger,
    registrar: Registrar,
}

impl std::fmt::Debug for Courier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Courier")
            .field("endpoint", &self.config.collector.endpoint)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl Courier {
    /// Assemble from explicit collaborators.
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
        transmitter: Arc<dyn Transmitter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = DedupLedger::new(Arc::clone(&store), Arc::clone(&clock), config.dedup.clone());
        let inflight = Arc::new(InFlightCoordinator::new(config.inflight.cleanup_delay()));
        let channel = DeliveryChannel::new(transport, ledger.clone(), inflight, Arc::clone(&clock));
        let outbox = Arc::new(Outbox::new(Arc::clone(&store)));
        let fast = Arc::new(FastSender::new(
            transmitter,
            Arc::clone(&outbox),
            Arc::clone(&clock),
        ));
        let registrar = Registrar::new(
            Arc::clone(&store),
            Arc::new(MemoryStore::new()),
            ledger,
            Arc::clone(&fast),
            Arc::clone(&clock),
        );
        Self {
            scores: ScoreLedger::new(store),
            config,
            clock,
            channel,
            outbox,
            fast,
            registrar,
        }
    }

    /// Validate `config` and assemble over the HTTP transport and the
    /// system clock.
    pub fn from_config(config: Config, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        config.validate()?;
        let http = Arc::new(HttpTransport::new(&config.collector)?);
        info!(endpoint = %http.endpoint(), "Courier configured");
        Ok(Self::new(
            config,
            store,
            http.clone(),
            http,
            Arc::new(SystemClock),
        ))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Schedule the once-per-start outbox flush.
    pub fn start(&self) -> JoinHandle<FlushReport> {
        self.outbox
            .spawn_startup_flush(self.channel.clone(), self.config.outbox.flush_delay())
    }

    /// Fast-send an arbitrary payload.
    pub fn send_fast(&self, payload: &EventPayload) -> Queued {
        self.fast.send_fast(payload)
    }

    /// Awaited send of an arbitrary payload through the delivery channel.
    pub async fn send(&self, payload: &EventPayload) -> DeliveryOutcome {
        self.channel.send(payload).await
    }

    pub fn send_user_registration(&self, fields: Fields) -> Queued {
        self.send_fast(&EventPayload::new(Action::Registration, fields))
    }

    pub fn send_test_result(&self, fields: Fields) -> Queued {
        self.send_fast(&EventPayload::new(Action::TestResult, fields))
    }

    /// Fast-send a login, stamping `loginDate` with the current time.
    pub fn send_login_event(&self, fields: Fields) -> Queued {
        let login_date = self
            .clock
            .now_utc()
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let payload =
            EventPayload::new(Action::Login, fields).with_field(field::LOGIN_DATE, login_date);
        self.send_fast(&payload)
    }

    /// Ask the collector whether a user exists. Awaited; `Failed` when the
    /// collector could not be reached.
    pub async fn send_login_check(&self, email: &str, phone: &str) -> DeliveryOutcome {
        let payload = EventPayload::new(Action::LoginCheck, Fields::new())
            .with_field(field::EMAIL, normalize_email(email))
            .with_field(field::PHONE, normalize_phone(phone));
        self.channel.query(&payload).await
    }

    #[must_use]
    pub fn scores(&self) -> &ScoreLedger {
        &self.scores
    }

    pub fn register_user(&self, form: &RegistrationForm) -> RegistrationOutcome {
        self.registrar.register_user(form)
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registrar.is_registered()
    }

    #[must_use]
    pub fn profile(&self) -> Option<UserProfile> {
        self.registrar.profile()
    }

    pub fn logout(&self) {
        self.registrar.logout();
    }

    pub async fn flush_outbox(&self) -> FlushReport {
        self.outbox.flush(&self.channel).await
    }

    #[must_use]
    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    #[must_use]
    pub fn ledger(&self) -> &DedupLedger {
        self.channel.ledger()
    }
}
