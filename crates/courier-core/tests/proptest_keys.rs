//! Property-based tests for idempotency key derivation.
//!
//! Validates:
//! 1. Purity: incidental fields never change the key
//! 2. Field order never changes the key
//! 3. Registration keys ignore email case and surrounding whitespace
//! 4. Registration keys ignore phone punctuation
//! 5. TTL class is Registration exactly for registration payloads
//! 6. A payload's own date wins over "today"
//! 7. Header value is always a valid HTTP header value
//! 8. User ids are deterministic and email-normalized

use chrono::NaiveDate;
use proptest::prelude::*;
use serde_json::{Value, json};

use courier_core::clock::ManualClock;
use courier_core::keys::{TtlClass, derive_key_on, user_id_for_email};
use courier_core::payload::{Action, EventPayload, Fields};

// =============================================================================
// Strategies
// =============================================================================

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Registration),
        Just(Action::Login),
        Just(Action::TestResult),
        Just(Action::LoginCheck),
        "[a-z_]{1,12}".prop_map(|raw| Action::parse(&raw)),
    ]
}

fn arb_email() -> impl Strategy<Value = String> {
    "[a-z0-9.]{1,10}@[a-z]{2,8}\\.(it|org|com)"
}

fn arb_day() -> impl Strategy<Value = NaiveDate> {
    (2020_i32..2030, 1_u32..13, 1_u32..29)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

/// Fields that never participate in identity.
fn arb_incidental() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::vec(
        (
            "(note|device|browser|percentage|firstName|lastName|durationMs)",
            prop_oneof![
                any::<i64>().prop_map(Value::from),
                "[ -~]{0,16}".prop_map(Value::from),
                any::<bool>().prop_map(Value::from),
            ],
        ),
        0..6,
    )
}

fn arb_identity(email: String) -> impl Strategy<Value = Vec<(String, Value)>> {
    (
        prop::option::of("user_[0-9]{1,10}"),
        prop::option::of("[A-Za-z ]{1,12}"),
        prop::option::of(0_u32..50),
        1_u32..50,
    )
        .prop_map(move |(user, test, score, total)| {
            let mut fields = vec![("email".to_string(), json!(email.clone()))];
            if let Some(user) = user {
                fields.push(("userId".to_string(), json!(user)));
            }
            if let Some(test) = test {
                fields.push(("testName".to_string(), json!(test)));
            }
            if let Some(score) = score {
                fields.push(("score".to_string(), json!(score)));
                fields.push(("total".to_string(), json!(total)));
            }
            fields
        })
}

fn payload(action: &Action, fields: &[(String, Value)]) -> EventPayload {
    let map: Fields = fields.iter().cloned().collect();
    EventPayload::new(action.clone(), map)
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn incidental_fields_do_not_change_key(
        action in arb_action(),
        identity in arb_email().prop_flat_map(arb_identity),
        extra in arb_incidental(),
        today in arb_day(),
    ) {
        let base = derive_key_on(&payload(&action, &identity), today);
        let mut noisy = identity.clone();
        noisy.extend(extra);
        let with_noise = derive_key_on(&payload(&action, &noisy), today);
        prop_assert_eq!(base, with_noise);
    }

    #[test]
    fn field_order_does_not_change_key(
        action in arb_action(),
        identity in arb_email().prop_flat_map(arb_identity),
        today in arb_day(),
    ) {
        let mut reversed = identity.clone();
        reversed.reverse();
        prop_assert_eq!(
            derive_key_on(&payload(&action, &identity), today),
            derive_key_on(&payload(&action, &reversed), today)
        );
    }

    #[test]
    fn registration_key_ignores_email_case_and_padding(
        email in arb_email(),
        pad in "[ \t]{0,3}",
        today in arb_day(),
    ) {
        let plain = payload(&Action::Registration, &[("email".into(), json!(email))]);
        let noisy = payload(
            &Action::Registration,
            &[("email".into(), json!(format!("{pad}{}{pad}", email.to_uppercase())))],
        );
        prop_assert_eq!(derive_key_on(&plain, today), derive_key_on(&noisy, today));
    }

    #[test]
    fn registration_key_ignores_phone_punctuation(
        digits in "[0-9]{6,12}",
        today in arb_day(),
    ) {
        let spaced: String = digits
            .chars()
            .enumerate()
            .flat_map(|(i, c)| if i % 3 == 2 { vec![c, '-'] } else { vec![c] })
            .collect();
        let plain = payload(&Action::Registration, &[("phone".into(), json!(digits.clone()))]);
        let noisy = payload(
            &Action::Registration,
            &[("phone".into(), json!(format!("+{spaced}")))],
        );
        let (key, _) = derive_key_on(&noisy, today);
        prop_assert_eq!(derive_key_on(&plain, today).0, key.clone());
        prop_assert_eq!(key.as_str(), format!("registration|{digits}"));
    }

    #[test]
    fn ttl_class_tracks_action(
        action in arb_action(),
        today in arb_day(),
    ) {
        let (_, ttl) = derive_key_on(&payload(&action, &[]), today);
        let expected = if action == Action::Registration {
            TtlClass::Registration
        } else {
            TtlClass::Ordinary
        };
        prop_assert_eq!(ttl, expected);
    }

    #[test]
    fn own_date_wins_over_today(
        day in arb_day(),
        today in arb_day(),
    ) {
        let date = day.format("%Y-%m-%d").to_string();
        let p = payload(&Action::TestResult, &[("testDate".into(), json!(date.clone()))]);
        let (key, _) = derive_key_on(&p, today);
        prop_assert!(key.as_str().contains(&date));
    }

    #[test]
    fn header_value_is_always_valid(
        action in arb_action(),
        name in "\\PC{0,20}",
        today in arb_day(),
    ) {
        let p = payload(&action, &[("testName".into(), json!(name))]);
        let (key, _) = derive_key_on(&p, today);
        let header = key.header_value();
        prop_assert!(header.bytes().all(|b| b == b' ' || b.is_ascii_graphic()));
    }

    #[test]
    fn user_id_is_deterministic(
        email in arb_email(),
        now in 1_u64..4_000_000_000_000,
    ) {
        let clock = ManualClock::new(now);
        let a = user_id_for_email(&email, &clock);
        let padded = format!("  {}  ", email.to_uppercase());
        let b = user_id_for_email(&padded, &ManualClock::new(now + 1));
        prop_assert_eq!(&a, &b);
        prop_assert!(a.starts_with("user_"));
    }
}
