//! Local registration bookkeeping.
//!
//! Keeps the registered profile and flags in the durable store, hands the
//! registration event to the fast path, and short-circuits when the same
//! registration was already confirmed in its (long) dedup window. A session
//! lock, held only for the duration of the call, rejects a second
//! concurrent registration.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::fast::FastSender;
use crate::keys::{derive_key_with, normalize_email, normalize_phone, user_id_for_email};
use crate::ledger::DedupLedger;
use crate::payload::{Action, EventPayload, Fields};
use crate::store::{KeyValueStore, load_json, remove_slot, save_json, slot};

const LOCK_HELD: &str = "1";
const REGISTERED: &str = "true";

/// What the user typed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationForm {
    pub last_name: String,
    pub first_name: String,
    pub email: String,
    pub phone: String,
}

/// Registered identity as stored under `userData` and sent to the collector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub user_id: String,
    pub last_name: String,
    pub first_name: String,
    pub email: String,
    pub phone: String,
    pub registration_date: String,
}

impl UserProfile {
    /// Event payload for this profile.
    #[must_use]
    pub fn to_payload(&self, action: Action) -> EventPayload {
        let fields = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(fields)) => fields,
            _ => Fields::new(),
        };
        EventPayload::new(action, fields)
    }
}

/// Result of [`Registrar::register_user`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RegistrationOutcome {
    /// Stored locally and handed to the fast path
    Submitted { profile: UserProfile },
    /// Stored locally; the collector already has this registration
    AlreadyRegistered { profile: UserProfile },
    /// Another registration is running in this session
    Locked,
}

/// Releases the session lock on drop.
struct SessionLock<'a> {
    session: &'a dyn KeyValueStore,
}

impl Drop for SessionLock<'_> {
    fn drop(&mut self) {
        remove_slot(self.session, slot::REGISTER_LOCK);
    }
}

/// Registration flow over the durable store, a session-scoped store, the
/// dedup ledger and the fast path.
pub struct Registrar {
    store: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    ledger: DedupLedger,
    fast: Arc<FastSender>,
    clock: Arc<dyn Clock>,
    lock_guard: Mutex<()>,
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl Registrar {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
        ledger: DedupLedger,
        fast: Arc<FastSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            session,
            ledger,
            fast,
            clock,
            lock_guard: Mutex::new(()),
        }
    }

    fn try_lock(&self) -> Option<SessionLock<'_>> {
        let _check = self.lock_guard.lock().unwrap_or_else(PoisonError::into_inner);
        match self.session.get(slot::REGISTER_LOCK) {
            Ok(Some(flag)) if flag == LOCK_HELD => return None,
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Session lock unreadable, assuming free"),
        }
        if let Err(e) = self.session.set(slot::REGISTER_LOCK, LOCK_HELD) {
            warn!(error = %e, "Session lock not persisted");
        }
        Some(SessionLock {
            session: self.session.as_ref(),
        })
    }

    fn stable_user_id(&self, email: &str) -> String {
        self.profile()
            .filter(|existing| normalize_email(&existing.email) == email)
            .map(|existing| existing.user_id)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| user_id_for_email(email, self.clock.as_ref()))
    }

    fn store_locally(&self, profile: &UserProfile) {
        save_json(self.store.as_ref(), slot::USER_DATA, profile);
        if let Err(e) = self.store.set(slot::IS_REGISTERED, REGISTERED) {
            warn!(error = %e, "Registration flag not persisted");
        }
        for progress in slot::PROGRESS {
            remove_slot(self.store.as_ref(), progress);
        }
    }

    /// Register a user from `form`.
    pub fn register_user(&self, form: &RegistrationForm) -> RegistrationOutcome {
        let Some(_lock) = self.try_lock() else {
            warn!("Registration already in progress in this session");
            return RegistrationOutcome::Locked;
        };

        let email = normalize_email(&form.email);
        let profile = UserProfile {
            user_id: self.stable_user_id(&email),
            last_name: form.last_name.trim().to_string(),
            first_name: form.first_name.trim().to_string(),
            email,
            phone: normalize_phone(&form.phone),
            registration_date: self
                .clock
                .now_utc()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        let payload = profile.to_payload(Action::Registration);
        let (key, ttl) = derive_key_with(&payload, self.clock.as_ref());
        let already = self.ledger.is_suppressed(&key, ttl);

        self.store_locally(&profile);

        if already {
            info!(
                key = %key,
                user_id = %profile.user_id,
                "Registration already confirmed, not resending"
            );
            return RegistrationOutcome::AlreadyRegistered { profile };
        }

        self.fast.send_fast(&payload);
        info!(key = %key, user_id = %profile.user_id, "Registration submitted");
        RegistrationOutcome::Submitted { profile }
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        matches!(self.store.get(slot::IS_REGISTERED), Ok(Some(flag)) if flag == REGISTERED)
    }

    #[must_use]
    pub fn profile(&self) -> Option<UserProfile> {
        load_json(self.store.as_ref(), slot::USER_DATA)
    }

    /// Forget the local identity and the dedup history.
    pub fn logout(&self) {
        forget_identity(self.store.as_ref(), &self.ledger);
    }
}

/// Remove the registration flag, the stored profile and the dedup history.
/// Queued events stay in the outbox.
pub fn forget_identity(store: &dyn KeyValueStore, ledger: &DedupLedger) {
    remove_slot(store, slot::IS_REGISTERED);
    remove_slot(store, slot::USER_DATA);
    ledger.clear();
    info!("Logged out");
}
