//! Per-target results for best-effort fan-out steps.
//!
//! Steps that touch many nodes independently (forget propagation, replica
//! attachment, consistency probing) never stop at the first failure. Each
//! target's result is recorded here so callers and tests can see exactly
//! which targets failed.

use serde::Serialize;

/// Result of one step against one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }

    /// Failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Succeeded => None,
            Outcome::Failed(reason) => Some(reason),
        }
    }
}

impl<E: std::fmt::Display> From<Result<(), E>> for Outcome {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Outcome::Succeeded,
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }
}

/// Outcome for one named target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOutcome {
    pub target: String,
    pub outcome: Outcome,
}

/// Ordered collection of per-target outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FanOutReport {
    outcomes: Vec<TargetOutcome>,
}

impl FanOutReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, target: impl Into<String>, outcome: impl Into<Outcome>) {
        self.outcomes.push(TargetOutcome {
            target: target.into(),
            outcome: outcome.into(),
        });
    }

    pub fn record_success(&mut self, target: impl Into<String>) {
        self.record(target, Outcome::Succeeded);
    }

    pub fn record_failure(&mut self, target: impl Into<String>, reason: impl ToString) {
        self.record(target, Outcome::Failed(reason.to_string()));
    }

    pub fn outcomes(&self) -> &[TargetOutcome] {
        &self.outcomes
    }

    /// Targets that succeeded, in recording order.
    pub fn succeeded(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.outcome.is_success())
            .map(|o| o.target.as_str())
            .collect()
    }

    /// Targets that failed, in recording order.
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.outcome.is_success())
            .map(|o| o.target.as_str())
            .collect()
    }

    pub fn outcome_for(&self, target: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.target == target)
            .map(|o| &o.outcome)
    }

    /// True when every recorded target succeeded (vacuously true when empty).
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.outcome.is_success())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
