//! Resolution Engine.
//!
//! Flattens a template into the concrete attribute set one account should
//! have at one instant, or decides the template does not apply there.
//!
//! Winner selection among slices of one attribute:
//! 1. an explicit account match beats a wildcard match
//! 2. a shorter `included_accounts` list beats a longer one
//! 3. the slice defined last wins
//!
//! Errors are scoped: a relative `expires_at` reaching this engine is a
//! validation error for the template, while a bad pattern or unknown
//! variable is a resolution error for the (template, account) pair only.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use iambic_core::{AccountContext, AccountId, IambicError, Result};
use iambic_template::variables::{substitute, substitute_value};
use iambic_template::{AccessModel, Attribute, ManagedMode, RepositoryContext, Slice, Template, VariableScope};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::grouping::ObservedResource;

/// Why a template does not apply to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum NotApplicableReason {
    /// `iambic_managed: disabled`.
    Disabled,
    /// The template itself is tombstoned.
    Deleted,
    /// The template-level `expires_at` has passed.
    Expired,
    /// The account falls outside the template's include/exclude predicate.
    OutOfScope,
    /// No slice of a required attribute applies to the account.
    MissingRequired(String),
}

/// A principal grant that applies to the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAccessRule {
    /// Principal, with variables substituted.
    pub principal: String,
    /// When the grant lapses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Concrete attributes of one template on one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAttributeSet {
    /// Template type tag.
    pub template_type: String,
    /// Identifier with variables substituted.
    pub identifier: String,
    /// Account the set was resolved for.
    pub account_id: AccountId,
    /// Attribute name to concrete value. Absent attributes are omitted.
    pub attributes: BTreeMap<String, Value>,
    /// Every attribute the template declares, resolved or not.
    pub declared: BTreeSet<String>,
    /// Collection attributes and the field identifying their entries.
    pub collection_keys: BTreeMap<String, String>,
    /// Principal grants in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_rules: Vec<ResolvedAccessRule>,
}

impl ResolvedAttributeSet {
    /// Attributes as a provider-style object.
    #[must_use]
    pub fn to_raw(&self) -> Map<String, Value> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Outcome of resolving a template for one account.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The resource should exist with these attributes.
    Applicable(ResolvedAttributeSet),
    /// The resource should not exist on the account.
    NotApplicable(NotApplicableReason),
}

impl Resolution {
    /// Whether the template applies.
    #[must_use]
    pub fn is_applicable(&self) -> bool {
        matches!(self, Resolution::Applicable(_))
    }

    /// The resolved set, if applicable.
    #[must_use]
    pub fn attributes(&self) -> Option<&ResolvedAttributeSet> {
        match self {
            Resolution::Applicable(set) => Some(set),
            Resolution::NotApplicable(_) => None,
        }
    }
}

/// Index of the slice that wins on `account` at `now`, if any.
pub(crate) fn select_slice(
    slices: &[Slice],
    account: &AccountContext,
    now: DateTime<Utc>,
    template: &str,
    field: &str,
) -> Result<Option<usize>> {
    let mut best: Option<((iambic_template::MatchStrength, Reverse<usize>, usize), usize)> = None;

    for (index, slice) in slices.iter().enumerate() {
        let live = slice
            .access
            .is_live_at(now)
            .map_err(|e| IambicError::validation_at(template, field, e.to_string()))?;
        if !live {
            continue;
        }
        let strength = slice.access.match_account(account).map_err(|e| {
            IambicError::resolution(template, account.account_name.clone(), e.to_string())
        })?;
        let Some(strength) = strength else {
            continue;
        };

        let rank = (strength, Reverse(slice.access.included_accounts.len()), index);
        if best.as_ref().map_or(true, |(r, _)| rank > *r) {
            best = Some((rank, index));
        }
    }

    Ok(best.map(|(_, index)| index))
}

/// Check the template-level access model.
fn check_template_scope(
    access: &AccessModel,
    account: &AccountContext,
    now: DateTime<Utc>,
    template: &str,
) -> Result<Option<NotApplicableReason>> {
    if access.deleted {
        return Ok(Some(NotApplicableReason::Deleted));
    }
    let live = access
        .is_live_at(now)
        .map_err(|e| IambicError::validation_at(template, "expires_at", e.to_string()))?;
    if !live {
        return Ok(Some(NotApplicableReason::Expired));
    }
    let matched = access.match_account(account).map_err(|e| {
        IambicError::resolution(template, account.account_name.clone(), e.to_string())
    })?;
    if matched.is_none() {
        return Ok(Some(NotApplicableReason::OutOfScope));
    }
    Ok(None)
}

/// Resolve `template` for `account` at `now`.
#[instrument(skip_all, fields(template = %template.identifier, account = %account.account_name))]
pub fn resolve(
    template: &Template,
    account: &AccountContext,
    repo: &RepositoryContext,
    now: DateTime<Utc>,
) -> Result<Resolution> {
    if template.iambic_managed == ManagedMode::Disabled {
        return Ok(Resolution::NotApplicable(NotApplicableReason::Disabled));
    }

    let name = template.identifier.as_str();
    let schema = repo.schemas.schema_for(template)?;

    if let Some(reason) = check_template_scope(&template.access, account, now, name)? {
        debug!(?reason, "Template not applicable");
        return Ok(Resolution::NotApplicable(reason));
    }

    let scope = repo.scope(account);
    let subst_err =
        |e: iambic_template::VariableError| IambicError::resolution(name, account.account_name.clone(), e.to_string());

    let mut attributes = BTreeMap::new();
    let mut collection_keys = BTreeMap::new();

    for (attribute, value) in &template.properties {
        let field = format!("properties.{attribute}");
        let resolved = match value {
            Attribute::Scalar(v) => Some(v.clone()),
            Attribute::Sliced(slices) => select_slice(slices, account, now, name, &field)?
                .map(|i| slices[i].value.clone()),
            Attribute::Collection { key_field, items } => {
                collection_keys.insert(attribute.clone(), key_field.clone());
                resolve_collection(key_field, items, account, now, name, &field)?
            }
        };

        match resolved {
            Some(Value::Null) | None => {
                debug!(attribute = %attribute, "Attribute absent on account");
            }
            Some(v) => {
                attributes.insert(attribute.clone(), substitute_value(&v, &scope).map_err(subst_err)?);
            }
        }
    }

    for required in &schema.required {
        if !attributes.contains_key(required) {
            debug!(attribute = %required, "Required attribute has no applicable slice");
            return Ok(Resolution::NotApplicable(NotApplicableReason::MissingRequired(
                required.clone(),
            )));
        }
    }

    let access_rules = resolve_access_rules(template, account, &scope, now)?;

    Ok(Resolution::Applicable(ResolvedAttributeSet {
        template_type: template.template_type.clone(),
        identifier: substitute(name, &scope).map_err(subst_err)?,
        account_id: account.account_id.clone(),
        attributes,
        declared: template.properties.keys().cloned().collect(),
        collection_keys,
        access_rules,
    }))
}

/// One winning entry per key; an empty result means the collection is absent.
fn resolve_collection(
    key_field: &str,
    items: &[Slice],
    account: &AccountContext,
    now: DateTime<Utc>,
    template: &str,
    field: &str,
) -> Result<Option<Value>> {
    let mut by_key: BTreeMap<String, Vec<Slice>> = BTreeMap::new();
    for item in items {
        if let Some(key) = item.key(key_field) {
            by_key.entry(key).or_default().push(item.clone());
        }
    }

    let mut entries = Vec::new();
    for (key, candidates) in &by_key {
        let item_field = format!("{field}[{key}]");
        if let Some(index) = select_slice(candidates, account, now, template, &item_field)? {
            let value = &candidates[index].value;
            if !value.is_null() {
                entries.push(value.clone());
            }
        }
    }

    Ok((!entries.is_empty()).then_some(Value::Array(entries)))
}

fn resolve_access_rules(
    template: &Template,
    account: &AccountContext,
    scope: &VariableScope<'_>,
    now: DateTime<Utc>,
) -> Result<Vec<ResolvedAccessRule>> {
    let name = template.identifier.as_str();
    let mut rules = Vec::new();

    for (index, rule) in template.access_rules.iter().enumerate() {
        let field = format!("access_rules[{index}]");
        let live = rule
            .access
            .is_live_at(now)
            .map_err(|e| IambicError::validation_at(name, field.as_str(), e.to_string()))?;
        if !live {
            continue;
        }
        let matched = rule.access.match_account(account).map_err(|e| {
            IambicError::resolution(name, account.account_name.clone(), e.to_string())
        })?;
        if matched.is_none() {
            continue;
        }

        let principal = substitute(&rule.principal, scope).map_err(|e| {
            IambicError::resolution(name, account.account_name.clone(), e.to_string())
        })?;
        let expires_at = match &rule.access.expires_at {
            Some(expr) => Some(
                expr.absolute()
                    .map_err(|e| IambicError::validation_at(name, field.as_str(), e.to_string()))?,
            ),
            None => None,
        };
        rules.push(ResolvedAccessRule {
            principal,
            expires_at,
        });
    }

    Ok(rules)
}

/// Resolve on every repository account, keeping applicable results as raw
/// per-account attributes.
///
/// This is the inverse of grouping: `group(materialize(t))` reproduces `t`.
pub fn materialize(
    template: &Template,
    repo: &RepositoryContext,
    now: DateTime<Utc>,
) -> Result<Vec<ObservedResource>> {
    let mut observed = Vec::new();
    for account in &repo.accounts {
        if let Resolution::Applicable(set) = resolve(template, account, repo, now)? {
            observed.push(ObservedResource::new(account.account_id.clone(), set.to_raw()));
        }
    }
    Ok(observed)
}
