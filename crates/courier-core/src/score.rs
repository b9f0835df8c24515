//! Score reconciliation across partial retries.
//!
//! A test can be retaken on only the questions answered wrong last time.
//! The ledger remembers, per test, the full atomic total and how many items
//! the current retry re-proposes, so the final score covers the whole test
//! rather than just the retried subset.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::store::{KeyValueStore, load_json, save_json, slot};

/// Stored state for one test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreEntry {
    pub full_total: u32,
    pub retry_wrong: u32,
}

/// Reconciled score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub correct: u32,
    pub total: u32,
    pub percentage: u32,
}

/// Shape of a question as far as atomic counting cares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Question {
    pub images: Option<Vec<Value>>,
    pub sub_questions: Option<Vec<Value>>,
}

impl Question {
    /// Number of atomic items: images, else sub-questions, else one.
    #[must_use]
    pub fn atomic_count(&self) -> usize {
        self.images
            .as_ref()
            .or(self.sub_questions.as_ref())
            .map_or(1, Vec::len)
    }
}

impl From<&Value> for Question {
    /// Lenient conversion: anything that is not an array under `images` or
    /// `subQuestions` is ignored, so malformed entries count as one item.
    fn from(value: &Value) -> Self {
        let list = |name: &str| value.get(name).and_then(Value::as_array).cloned();
        Self {
            images: list("images"),
            sub_questions: list("subQuestions"),
        }
    }
}

/// Total atomic items across `questions`.
#[must_use]
pub fn atomic_total(questions: &[Question]) -> usize {
    questions.iter().map(Question::atomic_count).sum()
}

type Scores = BTreeMap<String, ScoreEntry>;

/// Persistent per-test score bookkeeping in the `fullScoreFix` slot.
#[derive(Clone)]
pub struct ScoreLedger {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for ScoreLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoreLedger").finish_non_exhaustive()
    }
}

impl ScoreLedger {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn update(&self, test_id: &str, apply: impl FnOnce(&mut ScoreEntry)) {
        let mut scores: Scores = load_json(self.store.as_ref(), slot::SCORES);
        apply(scores.entry(test_id.to_string()).or_default());
        save_json(self.store.as_ref(), slot::SCORES, &scores);
    }

    /// Start (or restart) a test with `full_total` atomic items.
    pub fn init(&self, test_id: &str, full_total: u32) {
        self.update(test_id, |entry| {
            entry.full_total = full_total;
            entry.retry_wrong = 0;
        });
        debug!(test_id, full_total, "Score ledger initialised");
    }

    /// Record that the current run re-proposes `wrong` items.
    pub fn set_retry_wrong(&self, test_id: &str, wrong: u32) {
        self.update(test_id, |entry| entry.retry_wrong = wrong);
        debug!(test_id, wrong, "Retry subset recorded");
    }

    #[must_use]
    pub fn entry(&self, test_id: &str) -> Option<ScoreEntry> {
        let scores: Scores = load_json(self.store.as_ref(), slot::SCORES);
        scores.get(test_id).copied()
    }

    /// Reconcile `correct_this_run` against the stored state.
    ///
    /// `total - retry_wrong` is clamped at zero: on a test that was never
    /// initialised (total falls back to `correct_this_run`) a retry subset
    /// larger than the run scores `correct_this_run`, not less.
    #[must_use]
    pub fn build(&self, test_id: &str, correct_this_run: u32) -> ScoreSummary {
        let entry = self.entry(test_id).unwrap_or_default();
        let total = if entry.full_total > 0 {
            entry.full_total
        } else {
            correct_this_run
        };
        let correct = if entry.retry_wrong > 0 {
            total
                .saturating_sub(entry.retry_wrong)
                .saturating_add(correct_this_run)
        } else {
            correct_this_run
        };
        ScoreSummary {
            correct,
            total,
            percentage: percentage(correct, total),
        }
    }
}

fn percentage(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (f64::from(correct) / f64::from(total) * 100.0).round() as u32
}
