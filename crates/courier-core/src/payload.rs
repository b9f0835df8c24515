//! Event payloads handed to the delivery subsystem.
//!
//! A payload is an `action` discriminator plus an open object of primitive
//! fields. It serializes flat (`{"action": "login", "email": ...}`) so the
//! same shape is stored in the outbox and sent to the collector.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open field map carried by a payload.
pub type Fields = serde_json::Map<String, Value>;

/// Well-known field names.
pub mod field {
    pub const ACTION: &str = "action";
    pub const IDEMPOTENCY_KEY: &str = "idempotencyKey";
    pub const USER_ID: &str = "userId";
    pub const EMAIL: &str = "email";
    pub const PHONE: &str = "phone";
    pub const TEST_NAME: &str = "testName";
    pub const TEST_DATE: &str = "testDate";
    pub const LOGIN_DATE: &str = "loginDate";
    pub const SCORE: &str = "score";
    pub const TOTAL: &str = "total";
    pub const PERCENTAGE: &str = "percentage";
    pub const FIRST_NAME: &str = "firstName";
    pub const LAST_NAME: &str = "lastName";
    pub const REGISTRATION_DATE: &str = "registrationDate";
}

/// Event discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Registration,
    Login,
    TestResult,
    LoginCheck,
    /// Anything else, including the `generic` fallback.
    Other(String),
}

impl Action {
    pub const GENERIC: &'static str = "generic";

    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "registration" => Self::Registration,
            "login" => Self::Login,
            "test_result" => Self::TestResult,
            "login_check" => Self::LoginCheck,
            "" => Self::Other(Self::GENERIC.to_string()),
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Registration => "registration",
            Self::Login => "login",
            Self::TestResult => "test_result",
            Self::LoginCheck => "login_check",
            Self::Other(raw) => raw,
        }
    }
}

impl Default for Action {
    fn default() -> Self {
        Self::Other(Self::GENERIC.to_string())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Action {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<&str> for Action {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.as_str().to_string()
    }
}

/// A single logical event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub action: Action,
    #[serde(flatten)]
    pub fields: Fields,
}

impl EventPayload {
    #[must_use]
    pub fn new(action: impl Into<Action>, fields: Fields) -> Self {
        let mut payload = Self {
            action: action.into(),
            fields: Fields::new(),
        };
        for (name, value) in fields {
            payload.set(name, value);
        }
        payload
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name.into(), value.into());
        self
    }

    /// Set a field. An `action` entry replaces the discriminator instead of
    /// landing in the open map, and `idempotencyKey` is never accepted from
    /// callers because the key is always derived.
    pub fn set(&mut self, name: String, value: Value) {
        match name.as_str() {
            field::ACTION => {
                self.action = value.as_str().map(Action::parse).unwrap_or_default();
            }
            field::IDEMPOTENCY_KEY => {}
            _ => {
                self.fields.insert(name, value);
            }
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Field rendered as text, treating null and empty strings as absent.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<String> {
        self.field(name).and_then(render_value).filter(|s| !s.is_empty())
    }

    /// The body posted to the collector: every field plus the key.
    #[must_use]
    pub fn wire_body(&self, key: &str) -> Value {
        let mut body = Fields::with_capacity(self.fields.len() + 2);
        body.insert(
            field::ACTION.to_string(),
            Value::String(self.action.as_str().to_string()),
        );
        for (name, value) in &self.fields {
            body.insert(name.clone(), value.clone());
        }
        body.insert(
            field::IDEMPOTENCY_KEY.to_string(),
            Value::String(key.to_string()),
        );
        Value::Object(body)
    }
}

/// Render a primitive the way it would be interpolated into a string.
/// Null, arrays and objects have no textual form.
#[must_use]
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_parses_known_and_unknown_values() {
        assert_eq!(Action::parse("registration"), Action::Registration);
        assert_eq!(Action::parse("login_check"), Action::LoginCheck);
        assert_eq!(Action::parse("export"), Action::Other("export".to_string()));
        assert_eq!(Action::parse(""), Action::default());
        assert_eq!(Action::default().as_str(), "generic");
    }

    #[test]
    fn payload_serializes_flat() {
        let payload = EventPayload::of_login_fixture();
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({"action": "login", "email": "a@b.it", "loginDate": "2024-05-01"})
        );
        let back: EventPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn missing_action_deserializes_as_generic() {
        let payload: EventPayload = serde_json::from_value(json!({"userId": "u1"})).unwrap();
        assert_eq!(payload.action.as_str(), "generic");
        assert_eq!(payload.text("userId").as_deref(), Some("u1"));
    }

    #[test]
    fn action_field_is_routed_to_discriminator() {
        let mut fields = Fields::new();
        fields.insert("action".to_string(), json!("test_result"));
        fields.insert("idempotencyKey".to_string(), json!("forged"));
        fields.insert("score".to_string(), json!(3));
        let payload = EventPayload::new(Action::Other("x".into()), fields);
        assert_eq!(payload.action, Action::TestResult);
        assert!(payload.field("action").is_none());
        assert!(payload.field("idempotencyKey").is_none());
    }

    #[test]
    fn wire_body_carries_key() {
        let body = EventPayload::of_login_fixture().wire_body("login|a@b.it");
        assert_eq!(body["idempotencyKey"], json!("login|a@b.it"));
        assert_eq!(body["action"], json!("login"));
        assert_eq!(body["email"], json!("a@b.it"));
    }

    #[test]
    fn text_treats_empty_and_null_as_absent() {
        let payload = EventPayload::default()
            .with_field("a", "")
            .with_field("b", Value::Null)
            .with_field("c", 0)
            .with_field("d", 7.5);
        assert_eq!(payload.text("a"), None);
        assert_eq!(payload.text("b"), None);
        assert_eq!(payload.text("c").as_deref(), Some("0"));
        assert_eq!(payload.text("d").as_deref(), Some("7.5"));
    }

    impl EventPayload {
        fn of_login_fixture() -> Self {
            Self::new(Action::Login, Fields::new())
                .with_field("email", "a@b.it")
                .with_field("loginDate", "2024-05-01")
        }
    }
}
