//! Idempotency key derivation.
//!
//! A key is a pure function of a payload's stable identity fields, so the
//! same logical event maps to the same key no matter when it was built or
//! which incidental fields (timestamps, signatures, names) it carries.
//!
//! ```text
//! registration:  registration|<email or phone digits or "anon">
//! everything else: <action>|<userId or email or "anon">|<testName>|<date>|<score/total>
//! ```

use std::fmt;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::{Clock, SystemClock};
use crate::config::DedupConfig;
use crate::payload::{Action, EventPayload, field, render_value};

const ANON: &str = "anon";

/// Derived idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the idempotency header. Keys that are not valid header
    /// text (control characters, non-ASCII names) are replaced by a
    /// SHA-256 digest so the request can still be built.
    #[must_use]
    pub fn header_value(&self) -> String {
        if self.0.bytes().all(|b| b == b' ' || b.is_ascii_graphic()) {
            self.0.clone()
        } else {
            let digest = Sha256::digest(self.0.as_bytes());
            format!("sha256:{}", hex::encode(digest))
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Suppression window class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    /// Registration must never be resubmitted for the same identity.
    Registration,
    /// Duplicate-click suppression only.
    Ordinary,
}

impl TtlClass {
    #[must_use]
    pub fn for_action(action: &Action) -> Self {
        match action {
            Action::Registration => Self::Registration,
            _ => Self::Ordinary,
        }
    }

    #[must_use]
    pub fn window(self, config: &DedupConfig) -> Duration {
        match self {
            Self::Registration => Duration::from_millis(config.registration_window_ms),
            Self::Ordinary => Duration::from_millis(config.ordinary_window_ms),
        }
    }
}

/// The fields that identify a logical event, by action family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StableIdentity {
    Registration {
        email: Option<String>,
        phone: Option<String>,
    },
    Event {
        action: String,
        subject: Option<String>,
        test_name: Option<String>,
        date: Option<String>,
        score: Option<String>,
    },
}

impl StableIdentity {
    #[must_use]
    pub fn of(payload: &EventPayload) -> Self {
        match payload.action {
            Action::Registration => Self::Registration {
                email: payload
                    .text(field::EMAIL)
                    .map(|e| normalize_email(&e))
                    .filter(|e| !e.is_empty()),
                phone: payload
                    .text(field::PHONE)
                    .map(|p| normalize_phone(&p))
                    .filter(|p| !p.is_empty()),
            },
            _ => {
                let score = match (payload.field(field::SCORE), payload.field(field::TOTAL)) {
                    (Some(score), Some(total)) => render_value(score)
                        .zip(render_value(total))
                        .map(|(s, t)| format!("{s}/{t}")),
                    _ => None,
                };
                Self::Event {
                    action: payload.action.as_str().to_string(),
                    subject: payload
                        .text(field::USER_ID)
                        .or_else(|| payload.text(field::EMAIL)),
                    test_name: payload.text(field::TEST_NAME),
                    date: payload
                        .text(field::TEST_DATE)
                        .or_else(|| payload.text(field::LOGIN_DATE)),
                    score,
                }
            }
        }
    }

    fn into_key(self, today: NaiveDate) -> IdempotencyKey {
        let raw = match self {
            Self::Registration { email, phone } => {
                let who = email.or(phone).unwrap_or_else(|| ANON.to_string());
                format!("{}|{who}", Action::Registration.as_str())
            }
            Self::Event {
                action,
                subject,
                test_name,
                date,
                score,
            } => [
                action,
                subject.unwrap_or_else(|| ANON.to_string()),
                test_name.unwrap_or_default(),
                date.unwrap_or_else(|| today.format("%Y-%m-%d").to_string()),
                score.unwrap_or_default(),
            ]
            .join("|"),
        };
        IdempotencyKey(raw)
    }
}

/// Derive the key and TTL class using the system clock for the date
/// fallback.
#[must_use]
pub fn derive_key(payload: &EventPayload) -> (IdempotencyKey, TtlClass) {
    derive_key_on(payload, SystemClock.today())
}

/// Derive the key and TTL class with an explicit "today" for payloads that
/// carry no date of their own.
#[must_use]
pub fn derive_key_on(payload: &EventPayload, today: NaiveDate) -> (IdempotencyKey, TtlClass) {
    let key = StableIdentity::of(payload).into_key(today);
    (key, TtlClass::for_action(&payload.action))
}

/// Same as [`derive_key`] but reading the date from an injected clock.
#[must_use]
pub fn derive_key_with(payload: &EventPayload, clock: &dyn Clock) -> (IdempotencyKey, TtlClass) {
    derive_key_on(payload, clock.today())
}

#[must_use]
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[must_use]
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// 32-bit rolling string hash over UTF-16 code units (`h = h * 31 + c`,
/// wrapping), reported as its absolute value. Stable across platforms so
/// the same email always yields the same user id.
#[must_use]
pub fn string_hash(input: &str) -> String {
    let h = input
        .encode_utf16()
        .fold(0_i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)));
    h.unsigned_abs().to_string()
}

/// Deterministic user id for an email address; falls back to a
/// time-based id when no email is known.
#[must_use]
pub fn user_id_for_email(email: &str, clock: &dyn Clock) -> String {
    let normalized = normalize_email(email);
    if normalized.is_empty() {
        format!("user_{}", clock.now_ms())
    } else {
        format!("user_{}", string_hash(&normalized))
    }
}
