//! Run report: partial-failure summary of a plan run.

use std::collections::BTreeMap;

use iambic_core::{ErrorKind, IambicError};
use serde::Serialize;

use crate::plan::AccountPlan;

/// A template or (template, account) pair that could not be processed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    /// Type of the failed template.
    pub template_type: String,
    /// Template identifier.
    pub identifier: String,
    /// Account name; `None` when the whole template failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// What went wrong.
    pub error: IambicError,
}

impl FailureRecord {
    /// Failure of a whole template.
    pub fn template(
        template_type: impl Into<String>,
        identifier: impl Into<String>,
        error: IambicError,
    ) -> Self {
        Self {
            template_type: template_type.into(),
            identifier: identifier.into(),
            account: None,
            error,
        }
    }

    /// Failure of one account.
    #[must_use]
    pub fn on_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }
}

/// Counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    /// Templates that passed validation.
    pub templates_processed: u32,
    /// (template, account) pairs attempted.
    pub pairs_total: u32,
    /// Pairs where the template applies.
    pub applicable: u32,
    /// Pairs where the template does not apply.
    pub not_applicable: u32,
    /// Pairs planned against a read-only template.
    pub read_only: u32,
    /// Proposed changes broken down by type.
    pub changes_by_type: BTreeMap<String, u32>,
    /// Failures broken down by error kind.
    pub failures_by_kind: BTreeMap<String, u32>,
}

impl RunStatistics {
    /// Create new empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of proposed changes.
    #[must_use]
    pub fn changes_total(&self) -> u32 {
        self.changes_by_type.values().sum()
    }

    /// Get the number of failures of one kind.
    #[must_use]
    pub fn failure_count(&self, kind: ErrorKind) -> u32 {
        self.failures_by_kind.get(kind.as_str()).copied().unwrap_or(0)
    }

    /// Merge with another statistics instance.
    pub fn merge(&mut self, other: &RunStatistics) {
        self.templates_processed += other.templates_processed;
        self.pairs_total += other.pairs_total;
        self.applicable += other.applicable;
        self.not_applicable += other.not_applicable;
        self.read_only += other.read_only;

        for (key, value) in &other.changes_by_type {
            *self.changes_by_type.entry(key.clone()).or_insert(0) += value;
        }
        for (key, value) in &other.failures_by_kind {
            *self.failures_by_kind.entry(key.clone()).or_insert(0) += value;
        }
    }
}

/// Outcome of a run: the plans that succeeded and every failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    /// Pairs planned successfully.
    pub succeeded: u32,
    /// Templates or pairs that failed.
    pub failed: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,
    pub statistics: RunStatistics,
    pub plans: Vec<AccountPlan>,
}

impl RunReport {
    /// Create an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a planned pair.
    pub fn record_success(&mut self, plan: AccountPlan) {
        self.succeeded += 1;
        self.statistics.pairs_total += 1;
        if plan.applicable {
            self.statistics.applicable += 1;
        } else {
            self.statistics.not_applicable += 1;
        }
        if plan.read_only {
            self.statistics.read_only += 1;
        }
        for change in &plan.changes {
            *self
                .statistics
                .changes_by_type
                .entry(change.change_type.to_string())
                .or_insert(0) += 1;
        }
        self.plans.push(plan);
    }

    /// Record a failure.
    pub fn record_failure(&mut self, failure: FailureRecord) {
        self.failed += 1;
        if failure.account.is_some() {
            self.statistics.pairs_total += 1;
        }
        *self
            .statistics
            .failures_by_kind
            .entry(failure.error.kind().to_string())
            .or_insert(0) += 1;
        self.failures.push(failure);
    }

    /// Whether every template and pair succeeded.
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }

    /// Calculate the success rate as a percentage.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            100.0
        } else {
            (f64::from(self.succeeded) / f64::from(total)) * 100.0
        }
    }

    /// One-line summary for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed, {} changes proposed",
            self.succeeded,
            self.failed,
            self.statistics.changes_total()
        )
    }
}
