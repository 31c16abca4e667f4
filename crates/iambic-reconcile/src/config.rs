//! Reconciliation configuration.

use std::path::Path;

use iambic_core::Result;
use serde::{Deserialize, Serialize};

use crate::import::ImportRule;

/// Configuration for grouping, import and the plan runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Smallest account class that may be written as `*` or as an exclusion list.
    #[serde(default = "default_min_accounts_required_for_wildcard")]
    pub min_accounts_required_for_wildcard: usize,

    /// Replace each account's own id and name in observed values with tokens.
    #[serde(default = "default_templatize_account_values")]
    pub templatize_account_values: bool,

    /// Concurrency ceiling for template types whose schema sets none.
    #[serde(default = "default_max_concurrency")]
    pub default_max_concurrency: usize,

    /// Rules evaluated before grouping.
    #[serde(default)]
    pub import_rules: Vec<ImportRule>,
}

fn default_min_accounts_required_for_wildcard() -> usize {
    3
}

fn default_templatize_account_values() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    25
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            min_accounts_required_for_wildcard: default_min_accounts_required_for_wildcard(),
            templatize_account_values: default_templatize_account_values(),
            default_max_concurrency: default_max_concurrency(),
            import_rules: Vec::new(),
        }
    }
}

impl ReconcileConfig {
    /// Parse configuration from YAML.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Override the wildcard threshold.
    #[must_use]
    pub fn with_wildcard_threshold(mut self, threshold: usize) -> Self {
        self.min_accounts_required_for_wildcard = threshold;
        self
    }

    /// Append an import rule.
    #[must_use]
    pub fn with_import_rule(mut self, rule: ImportRule) -> Self {
        self.import_rules.push(rule);
        self
    }
}
