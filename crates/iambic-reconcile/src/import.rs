//! Import pipeline: rules, grouping and merge for one resource.
//!
//! Import rules run before grouping. An `ignore` rule drops the matching
//! per-account observations; a `set_import_only` rule marks the resulting
//! template `import_only`.

use chrono::{DateTime, Utc};
use iambic_core::Result;
use iambic_template::{validation, ManagedMode, RepositoryContext, Template};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::config::ReconcileConfig;
use crate::grouping::{group, ObservedResource};
use crate::merge::{merge, MergeContext};

/// What a matching rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportAction {
    /// Do not import the resource.
    Ignore,
    /// Import the resource but never apply it.
    SetImportOnly,
}

/// A tag criterion; without a value any value of the key matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMatch {
    /// Tag key.
    pub key: String,
    /// Expected tag value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// One import rule.
///
/// Criteria groups are ANDed; entries inside a group are ORed. An empty
/// group does not constrain. A rule with no criteria at all matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRule {
    /// Effect of the rule.
    pub action: ImportAction,
    /// Template types the rule is limited to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_template_types: Vec<String>,
    /// Identifier globs (`*` and `?`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_names: Vec<String>,
    /// Tags on the observed resource.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_tags: Vec<TagMatch>,
    /// Prefixes of the observed `Path` attribute.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_paths: Vec<String>,
}

impl ImportRule {
    /// Create a rule with no criteria.
    #[must_use]
    pub fn new(action: ImportAction) -> Self {
        Self {
            action,
            match_template_types: Vec::new(),
            match_names: Vec::new(),
            match_tags: Vec::new(),
            match_paths: Vec::new(),
        }
    }

    /// Limit to a template type.
    #[must_use]
    pub fn for_template_type(mut self, template_type: impl Into<String>) -> Self {
        self.match_template_types.push(template_type.into());
        self
    }

    /// Match identifiers by glob.
    #[must_use]
    pub fn matching_name(mut self, glob: impl Into<String>) -> Self {
        self.match_names.push(glob.into());
        self
    }

    /// Match a tag key, optionally with a value.
    #[must_use]
    pub fn matching_tag(mut self, key: impl Into<String>, value: Option<&str>) -> Self {
        self.match_tags.push(TagMatch {
            key: key.into(),
            value: value.map(str::to_string),
        });
        self
    }

    /// Match a path prefix.
    #[must_use]
    pub fn matching_path(mut self, prefix: impl Into<String>) -> Self {
        self.match_paths.push(prefix.into());
        self
    }

    /// Whether the rule applies to one observation.
    #[must_use]
    pub fn matches(&self, template_type: &str, identifier: &str, resource: &ObservedResource) -> bool {
        self.matches_compiled(&self.compile_names(), template_type, identifier, resource)
    }

    fn compile_names(&self) -> Vec<Regex> {
        self.match_names.iter().filter_map(|g| compile_glob(g)).collect()
    }

    fn matches_compiled(
        &self,
        names: &[Regex],
        template_type: &str,
        identifier: &str,
        resource: &ObservedResource,
    ) -> bool {
        if self.match_names.is_empty() && self.match_tags.is_empty() && self.match_paths.is_empty() {
            return false;
        }
        if !self.match_template_types.is_empty()
            && !self.match_template_types.iter().any(|t| t == template_type)
        {
            return false;
        }
        if !self.match_names.is_empty() && !names.iter().any(|re| re.is_match(identifier)) {
            return false;
        }
        if !self.match_tags.is_empty() && !self.match_tags.iter().any(|t| has_tag(resource, t)) {
            return false;
        }
        if !self.match_paths.is_empty() {
            let path = resource.attributes.get("Path").and_then(Value::as_str).unwrap_or_default();
            if !self.match_paths.iter().any(|p| path.starts_with(p.as_str())) {
                return false;
            }
        }
        true
    }
}

fn compile_glob(glob: &str) -> Option<Regex> {
    let pattern = regex::escape(glob).replace(r"\*", ".*").replace(r"\?", ".");
    Regex::new(&format!("^{pattern}$")).ok()
}

fn has_tag(resource: &ObservedResource, wanted: &TagMatch) -> bool {
    let Some(Value::Array(tags)) = resource.attributes.get("Tags") else {
        return false;
    };
    tags.iter().any(|tag| {
        let key = tag.get("Key").or_else(|| tag.get("key")).and_then(Value::as_str);
        let value = tag.get("Value").or_else(|| tag.get("value")).and_then(Value::as_str);
        key == Some(wanted.key.as_str())
            && wanted.value.as_deref().map_or(true, |v| value == Some(v))
    })
}

/// Rules filtered for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredObservations {
    /// Observations that survived `ignore` rules.
    pub kept: Vec<ObservedResource>,
    /// Number of observations an `ignore` rule dropped.
    pub ignored: usize,
    /// Whether a `set_import_only` rule matched a kept observation.
    pub import_only: bool,
}

/// The ordered rule list of a configuration, with name globs compiled.
#[derive(Debug, Clone)]
pub struct ImportRules<'a> {
    rules: Vec<(&'a ImportRule, Vec<Regex>)>,
}

impl<'a> ImportRules<'a> {
    /// Wrap a rule list.
    #[must_use]
    pub fn new(rules: &'a [ImportRule]) -> Self {
        Self {
            rules: rules.iter().map(|r| (r, r.compile_names())).collect(),
        }
    }

    /// Apply the rules to every observation of one resource.
    #[must_use]
    pub fn filter(
        &self,
        template_type: &str,
        identifier: &str,
        observed: &[ObservedResource],
    ) -> FilteredObservations {
        let mut kept = Vec::with_capacity(observed.len());
        let mut ignored = 0;
        let mut import_only = false;

        for resource in observed {
            let matched = |action| {
                self.rules
                    .iter()
                    .filter(|(r, _)| r.action == action)
                    .any(|(r, names)| r.matches_compiled(names, template_type, identifier, resource))
            };
            if matched(ImportAction::Ignore) {
                ignored += 1;
                continue;
            }
            import_only |= matched(ImportAction::SetImportOnly);
            kept.push(resource.clone());
        }

        FilteredObservations {
            kept,
            ignored,
            import_only,
        }
    }
}

/// Why an import wrote nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Every observation matched an `ignore` rule.
    Ignored,
    /// Nothing observed and nothing on disk.
    NotObserved,
    /// The existing template is `iambic_managed: disabled`.
    Disabled,
}

/// What the storage layer should do with the template file.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    /// Write the merged template.
    Write(Template),
    /// Remove the file: the resource is gone from every account.
    Remove,
    /// Leave storage untouched.
    Skip(SkipReason),
}

/// Import one resource.
#[instrument(skip(existing, observed, repo, config), fields(observations = observed.len()))]
pub fn import(
    template_type: &str,
    identifier: &str,
    existing: Option<&Template>,
    observed: &[ObservedResource],
    repo: &RepositoryContext,
    config: &ReconcileConfig,
    now: DateTime<Utc>,
) -> Result<ImportOutcome> {
    if existing.is_some_and(|t| t.iambic_managed == ManagedMode::Disabled) {
        debug!("Template disabled, skipping import");
        return Ok(ImportOutcome::Skip(SkipReason::Disabled));
    }

    let filtered = ImportRules::new(&config.import_rules).filter(template_type, identifier, observed);
    if filtered.kept.is_empty() && filtered.ignored > 0 {
        info!(ignored = filtered.ignored, "All observations ignored by import rules");
        return Ok(ImportOutcome::Skip(SkipReason::Ignored));
    }

    if filtered.kept.is_empty() {
        return Ok(match existing {
            Some(_) => {
                info!("Resource absent on every account, removing template");
                ImportOutcome::Remove
            }
            None => ImportOutcome::Skip(SkipReason::NotObserved),
        });
    }

    let grouped = group(template_type, identifier, &filtered.kept, repo, config)?;
    let prepared = existing
        .map(|t| validation::prepare(t.clone(), &repo.schemas))
        .transpose()?;

    let ctx = MergeContext::new(repo, config, now);
    let mut merged = merge(prepared.as_ref(), &grouped, &ctx)?;

    if filtered.import_only && merged.iambic_managed == ManagedMode::Undefined {
        merged.iambic_managed = ManagedMode::ImportOnly;
    }

    info!(properties = merged.properties.len(), "Imported template");
    Ok(ImportOutcome::Write(merged))
}
