//! Time budgets for pattern matching.
//!
//! The `regex` crate matches in linear time, so a budget cannot interrupt a
//! search in flight. Instead every rule application and pattern search is
//! timed and its outcome discarded when it ran over, and a document-wide
//! deadline stops further work once it has passed.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::models::config::EngineConfig;

/// Per-application and per-document time limits.
#[derive(Debug, Clone, Copy)]
pub struct MatchBudget {
    per_match: Option<Duration>,
    deadline: Option<Instant>,
}

impl MatchBudget {
    /// A budget that never runs out.
    pub fn unlimited() -> Self {
        Self {
            per_match: None,
            deadline: None,
        }
    }

    /// Create a budget; the document deadline starts counting now.
    pub fn new(per_match: Option<Duration>, document: Option<Duration>) -> Self {
        Self {
            per_match,
            deadline: document.and_then(|d| Instant::now().checked_add(d)),
        }
    }

    /// Create a budget from engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.match_budget(), config.document_timeout())
    }

    /// Whether the document deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Whether a single application started at `started` ran over budget.
    pub fn overran(&self, started: Instant) -> bool {
        self.per_match.is_some_and(|b| started.elapsed() >= b)
    }
}

impl Default for MatchBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Pipeline stage, used to report where a deadline hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Normalize,
    Extract,
}

/// A recoverable budget failure recorded on a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// A replace rule ran over budget and was treated as non-matching.
    RuleBudgetExceeded { rule: usize, elapsed_ms: u64 },

    /// A field pattern ran over budget and was treated as non-matching.
    FieldBudgetExceeded {
        field: String,
        pattern: usize,
        elapsed_ms: u64,
    },

    /// The document deadline passed; remaining work was skipped.
    DeadlineReached { stage: Stage },
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
