//! Merge Engine.
//!
//! Combines a committed template with a freshly grouped observation of the
//! same resource. The template file owns IAMbic-only fields (owner, notes,
//! access rules, comments, expirations, tombstones); the provider owns
//! everything it can report.
//!
//! Per attribute, existing slices are compared account by account with what
//! the provider now reports:
//!
//! - a live slice whose every won account still shows its value is kept verbatim
//! - a live slice whose value survives on only some of its accounts is
//!   narrowed to those accounts, keeping its expiration
//! - a live slice whose value survives nowhere is dropped
//! - a tombstoned slice is kept while its value is still observed on an
//!   account it covers, and those accounts are left out of reconciliation;
//!   once the value is gone everywhere the tombstone is pruned
//! - a slice whose expiration has passed becomes a tombstone
//! - observed values nothing explains widen a matching explicit slice or
//!   become new slices
//!
//! Plain provider values always follow the observation: an out-of-band
//! change overwrites the template value.
//!
//! If the edited slice list does not reproduce the observation exactly, the
//! attribute is regrouped from the observation, keeping its tombstones.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use iambic_core::{IambicError, Result};
use iambic_template::access::{AccountPattern, WILDCARD};
use iambic_template::{AccessModel, Attribute, RepositoryContext, Slice, Template, TemporalExpression};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::ReconcileConfig;
use crate::resolution::select_slice;
use crate::scope::{cluster, covered, partition, slice_scope, values_agree, AccountSet};

/// Inputs shared by every merge of a run.
#[derive(Debug, Clone, Copy)]
pub struct MergeContext<'a> {
    /// Repository accounts, variables and schemas.
    pub repo: &'a RepositoryContext,
    /// Grouping thresholds.
    pub config: &'a ReconcileConfig,
    /// Instant relative expirations are pinned to and expiry is judged at.
    pub now: DateTime<Utc>,
}

impl<'a> MergeContext<'a> {
    /// Create a merge context.
    #[must_use]
    pub fn new(repo: &'a RepositoryContext, config: &'a ReconcileConfig, now: DateTime<Utc>) -> Self {
        Self { repo, config, now }
    }
}

/// Merge `observed` into `existing`.
///
/// Neither input is modified. Without an existing template the observation
/// is returned as is.
#[instrument(skip_all, fields(identifier = %observed.identifier))]
pub fn merge(existing: Option<&Template>, observed: &Template, ctx: &MergeContext<'_>) -> Result<Template> {
    let Some(existing) = existing else {
        debug!("No existing template, taking observation");
        return Ok(observed.clone());
    };

    if existing.template_type != observed.template_type {
        return Err(IambicError::merge_conflict(
            existing.identifier.clone(),
            format!(
                "existing template is '{}' but observation is '{}'",
                existing.template_type, observed.template_type
            ),
        ));
    }

    let name = existing.identifier.clone();
    let schema = ctx.repo.schemas.schema_for(existing)?;

    let mut merged = existing.clone();
    let was_deleted = merged.access.deleted;
    pin_access(&mut merged.access, ctx.now, &name, "expires_at")?;
    for (index, rule) in merged.access_rules.iter_mut().enumerate() {
        pin_access(&mut rule.access, ctx.now, &name, &format!("access_rules[{index}].expires_at"))?;
    }

    if merged.access.deleted {
        if !was_deleted {
            info!(identifier = %name, "Template expired, marking deleted");
        }
        pin_properties(&mut merged, ctx.now)?;
        return Ok(merged);
    }

    let existing_accounts = covered(&existing.access, ctx.repo, &name)?;
    let observed_accounts = covered(&observed.access, ctx.repo, &name)?;
    if existing_accounts != observed_accounts {
        debug!(
            existing = existing_accounts.len(),
            observed = observed_accounts.len(),
            "Template scope follows observation"
        );
        merged.access.set_scope_from(&observed.access);
    }

    let mut names: Vec<&String> = existing.properties.keys().collect();
    for key in observed.properties.keys() {
        if !existing.properties.contains_key(key) {
            names.push(key);
        }
    }

    let merger = AttributeMerger {
        ctx,
        name: &name,
        universe: observed_accounts,
    };

    let mut properties = BTreeMap::new();
    for attribute in names {
        if schema.iambic_only.contains(attribute.as_str()) {
            if let Some(kept) = existing.properties.get(attribute) {
                properties.insert(attribute.clone(), kept.clone());
            }
            continue;
        }

        let observed_attr = observed.properties.get(attribute);
        let result = match existing.properties.get(attribute) {
            None => observed_attr.cloned(),
            Some(existing_attr) => merger.merge_attribute(attribute, existing_attr, observed_attr)?,
        };
        if let Some(result) = result {
            properties.insert(attribute.clone(), result);
        } else {
            debug!(attribute = %attribute, "Attribute no longer observed");
        }
    }
    merged.properties = properties;

    Ok(merged)
}

/// Pin a relative expiration and tombstone the slice if it has passed.
///
/// Returns whether the slice became a tombstone.
fn pin_access(access: &mut AccessModel, now: DateTime<Utc>, template: &str, field: &str) -> Result<bool> {
    if let Some(expr @ TemporalExpression::Relative(_)) = &access.expires_at {
        let pinned = expr
            .normalize(now)
            .map_err(|e| IambicError::validation_at(template, field, e.to_string()))?;
        access.expires_at = Some(TemporalExpression::Absolute(pinned));
    }
    if !access.deleted && access.has_expired_at(now) {
        access.deleted = true;
        return Ok(true);
    }
    Ok(false)
}

fn pin_properties(template: &mut Template, now: DateTime<Utc>) -> Result<()> {
    let name = template.identifier.clone();
    for (attribute, value) in template.properties.iter_mut() {
        if let Some(slices) = value.slices_mut() {
            for (index, slice) in slices.iter_mut().enumerate() {
                pin_access(&mut slice.access, now, &name, &format!("properties.{attribute}[{index}]"))?;
            }
        }
    }
    Ok(())
}

struct AttributeMerger<'a> {
    ctx: &'a MergeContext<'a>,
    name: &'a str,
    /// Accounts the resource was observed on.
    universe: AccountSet,
}

/// Slice list of one attribute (or one collection key) being merged.
struct SliceList {
    slices: Vec<Slice>,
    previously_deleted: Vec<bool>,
}

impl AttributeMerger<'_> {
    fn merge_attribute(
        &self,
        attribute: &str,
        existing: &Attribute,
        observed: Option<&Attribute>,
    ) -> Result<Option<Attribute>> {
        let field = format!("properties.{attribute}");
        match (existing, observed) {
            (Attribute::Collection { key_field, items }, None | Some(Attribute::Collection { .. })) => {
                let observed_items = match observed {
                    Some(Attribute::Collection { items, .. }) => items.as_slice(),
                    _ => &[],
                };
                self.merge_collection(&field, key_field, items, observed_items)
            }
            (Attribute::Collection { .. }, Some(other)) | (_, Some(other @ Attribute::Collection { .. })) => {
                Err(IambicError::merge_conflict(
                    self.name,
                    format!(
                        "attribute '{attribute}' is a {} in the template but a {} in the observation",
                        existing.kind(),
                        other.kind()
                    ),
                ))
            }
            (existing_attr, observed_attr) => {
                let observed_values = self.observed_values(observed_attr, &field)?;
                let (list, was_scalar) = match existing_attr {
                    Attribute::Scalar(value) => (vec![Slice::everywhere(value.clone())], true),
                    other => (other.slices().to_vec(), false),
                };

                let original = self.pinned(list, &field)?;
                let pinned_slices = original.slices.clone();
                let merged = self.merge_slices(original, &observed_values, &field)?;

                if merged == pinned_slices {
                    return Ok(Some(match (was_scalar, pinned_slices.into_iter().next()) {
                        (true, Some(only)) => Attribute::Scalar(only.value),
                        _ => Attribute::Sliced(merged),
                    }));
                }
                if merged.is_empty() {
                    return Ok(None);
                }
                if let Some(value) = self.collapsible(&merged)? {
                    return Ok(Some(Attribute::Scalar(value)));
                }
                Ok(Some(Attribute::Sliced(merged)))
            }
        }
    }

    fn merge_collection(
        &self,
        field: &str,
        key_field: &str,
        existing: &[Slice],
        observed: &[Slice],
    ) -> Result<Option<Attribute>> {
        let pinned = self.pinned(existing.to_vec(), field)?;

        let mut keys: Vec<String> = Vec::new();
        let mut existing_by_key: BTreeMap<String, SliceList> = BTreeMap::new();
        for (item, was_deleted) in pinned.slices.iter().zip(&pinned.previously_deleted) {
            let Some(key) = item.key(key_field) else {
                return Err(IambicError::validation_at(
                    self.name,
                    field,
                    format!("entry is missing its '{key_field}' key"),
                ));
            };
            let list = existing_by_key.entry(key.clone()).or_insert_with(|| {
                keys.push(key);
                SliceList {
                    slices: Vec::new(),
                    previously_deleted: Vec::new(),
                }
            });
            list.slices.push(item.clone());
            list.previously_deleted.push(*was_deleted);
        }

        let mut observed_by_key: BTreeMap<String, Vec<Slice>> = BTreeMap::new();
        for item in observed {
            if let Some(key) = item.key(key_field) {
                observed_by_key.entry(key).or_default().push(item.clone());
            }
        }
        for key in observed_by_key.keys() {
            if !existing_by_key.contains_key(key) {
                keys.push(key.clone());
            }
        }

        let mut items = Vec::new();
        let mut changed = false;
        for key in keys {
            let item_field = format!("{field}[{key}]");
            let observed_items = observed_by_key.remove(&key).unwrap_or_default();

            let Some(list) = existing_by_key.remove(&key) else {
                debug!(field = %field, key = %key, "New collection entry");
                changed = true;
                items.extend(observed_items);
                continue;
            };

            let observed_values =
                self.observed_values(Some(&Attribute::Sliced(observed_items)), &item_field)?;
            let before = list.slices.clone();
            let mut merged = self.merge_slices(list, &observed_values, &item_field)?;

            if merged != before {
                changed = true;
                if self.collapsible(&merged)?.is_some() {
                    if let Some(only) = merged.first_mut() {
                        only.access = AccessModel::default();
                    }
                }
            }
            items.extend(merged);
        }

        if !changed {
            return Ok(Some(Attribute::Collection {
                key_field: key_field.to_string(),
                items: pinned.slices,
            }));
        }
        if items.is_empty() {
            return Ok(None);
        }
        Ok(Some(Attribute::Collection {
            key_field: key_field.to_string(),
            items,
        }))
    }

    /// Per-account raw value an observed attribute resolves to.
    fn observed_values(&self, observed: Option<&Attribute>, field: &str) -> Result<BTreeMap<usize, Value>> {
        let mut values = BTreeMap::new();
        let Some(observed) = observed else {
            return Ok(values);
        };
        for &index in &self.universe {
            let account = &self.ctx.repo.accounts[index];
            let value = match observed {
                Attribute::Scalar(v) => Some(v.clone()),
                other => {
                    let slices = other.slices();
                    select_slice(slices, account, self.ctx.now, self.name, field)?
                        .map(|i| slices[i].value.clone())
                }
            };
            if let Some(value) = value.filter(|v| !v.is_null()) {
                values.insert(index, value);
            }
        }
        Ok(values)
    }

    fn pinned(&self, mut slices: Vec<Slice>, field: &str) -> Result<SliceList> {
        let previously_deleted = slices.iter().map(|s| s.access.deleted).collect();
        for (index, slice) in slices.iter_mut().enumerate() {
            if pin_access(&mut slice.access, self.ctx.now, self.name, &format!("{field}[{index}]"))? {
                info!(field = %field, index, "Slice expired, marking deleted");
            }
        }
        Ok(SliceList {
            slices,
            previously_deleted,
        })
    }

    fn merge_slices(
        &self,
        list: SliceList,
        observed: &BTreeMap<usize, Value>,
        field: &str,
    ) -> Result<Vec<Slice>> {
        let repo = self.ctx.repo;
        let threshold = self.ctx.config.min_accounts_required_for_wildcard;
        let SliceList {
            slices,
            previously_deleted,
        } = list;

        // Tombstones hold back every account still showing their value.
        let mut reserved = AccountSet::new();
        let mut keep = vec![true; slices.len()];
        for (i, slice) in slices.iter().enumerate() {
            if !slice.access.deleted {
                continue;
            }
            let mut still_observed = AccountSet::new();
            for &index in covered(&slice.access, repo, self.name)?.intersection(&self.universe) {
                if let Some(value) = observed.get(&index) {
                    if self.agree(&slice.value, value, index)? {
                        still_observed.insert(index);
                    }
                }
            }
            if still_observed.is_empty() && previously_deleted[i] {
                debug!(field = %field, index = i, "Pruning tombstone no longer observed");
                keep[i] = false;
            }
            reserved.extend(still_observed);
        }
        let active: AccountSet = self.universe.difference(&reserved).copied().collect();

        let mut won: BTreeMap<usize, AccountSet> = BTreeMap::new();
        for &index in &active {
            let account = &repo.accounts[index];
            if let Some(winner) = select_slice(&slices, account, self.ctx.now, self.name, field)? {
                won.entry(winner).or_default().insert(index);
            }
        }

        let mut result: Vec<Slice> = Vec::new();
        for (i, slice) in slices.iter().enumerate() {
            if slice.access.deleted {
                if keep[i] {
                    result.push(slice.clone());
                }
                continue;
            }

            let wins = won.remove(&i).unwrap_or_default();
            let mut matching = AccountSet::new();
            for &index in &wins {
                if let Some(value) = observed.get(&index) {
                    if self.agree(&slice.value, value, index)? {
                        matching.insert(index);
                    }
                }
            }

            if matching.is_empty() {
                debug!(field = %field, index = i, "Dropping slice no longer observed");
                continue;
            }
            if matching.len() == wins.len() {
                result.push(slice.clone());
            } else {
                debug!(field = %field, index = i, kept = matching.len(), of = wins.len(), "Narrowing slice");
                let mut narrowed = slice.clone();
                narrowed
                    .access
                    .set_scope_from(&slice_scope(&matching, &self.universe, &repo.accounts, threshold));
                result.push(narrowed);
            }
        }

        // Accounts the kept slices do not already resolve to their observed value.
        let mut leftover: BTreeMap<usize, Value> = BTreeMap::new();
        for (&index, value) in observed {
            if !active.contains(&index) {
                continue;
            }
            let account = &repo.accounts[index];
            let resolved = select_slice(&result, account, self.ctx.now, self.name, field)?
                .map(|w| &result[w].value);
            let agrees = match resolved {
                Some(current) => self.agree(current, value, index)?,
                None => false,
            };
            if !agrees {
                leftover.insert(index, value.clone());
            }
        }

        for (value, class) in partition(&leftover) {
            let target = result
                .iter_mut()
                .find(|s| !s.access.deleted && s.value == value && widenable(&s.access));
            match target {
                Some(slice) => {
                    for &index in &class {
                        let account_name = &repo.accounts[index].account_name;
                        if !slice.access.included_accounts.iter().any(|n| n == account_name) {
                            slice.access.included_accounts.push(account_name.clone());
                        }
                    }
                }
                None => {
                    result.push(Slice::new(
                        slice_scope(&class, &self.universe, &repo.accounts, threshold),
                        value,
                    ));
                }
            }
        }

        if !self.reproduces(&result, observed, &active, field)? {
            warn!(field = %field, "Edited slices diverge from observation, regrouping attribute");
            let still_active: BTreeMap<usize, Value> = observed
                .iter()
                .filter(|(index, _)| active.contains(index))
                .map(|(index, value)| (*index, value.clone()))
                .collect();
            let mut fallback = cluster(
                &still_active,
                &self.universe,
                &repo.accounts,
                threshold,
            );
            fallback.extend(
                slices
                    .iter()
                    .enumerate()
                    .filter(|(i, s)| s.access.deleted && keep[*i])
                    .map(|(_, s)| s.clone()),
            );
            return Ok(fallback);
        }

        Ok(result)
    }

    /// Whether `slices` resolve to the observed value on every active account.
    fn reproduces(
        &self,
        slices: &[Slice],
        observed: &BTreeMap<usize, Value>,
        active: &AccountSet,
        field: &str,
    ) -> Result<bool> {
        for &index in active {
            let account = &self.ctx.repo.accounts[index];
            let resolved = select_slice(slices, account, self.ctx.now, self.name, field)?
                .map(|i| &slices[i].value)
                .filter(|v| !v.is_null());
            let matches = match (resolved, observed.get(&index)) {
                (None, None) => true,
                (Some(left), Some(right)) => self.agree(left, right, index)?,
                _ => false,
            };
            if !matches {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The single value a slice list reduces to, if it covers every observed
    /// account with one live, unexpiring, untombstoned slice.
    fn collapsible(&self, slices: &[Slice]) -> Result<Option<Value>> {
        let [only] = slices else {
            return Ok(None);
        };
        if only.access.deleted || only.access.expires_at.is_some() {
            return Ok(None);
        }
        let reach = covered(&only.access, self.ctx.repo, self.name)?;
        if self.universe.is_subset(&reach) {
            return Ok(Some(only.value.clone()));
        }
        Ok(None)
    }

    fn agree(&self, left: &Value, right: &Value, index: usize) -> Result<bool> {
        let account = &self.ctx.repo.accounts[index];
        values_agree(left, right, &self.ctx.repo.scope(account), self.name, account)
    }
}

/// Whether new accounts can be appended to this slice's include list.
fn widenable(access: &AccessModel) -> bool {
    access.expires_at.is_none()
        && access.excluded_accounts.is_empty()
        && access.excluded_orgs.is_empty()
        && access.included_orgs.iter().all(|o| o == WILDCARD)
        && access
            .included_accounts
            .iter()
            .all(|p| matches!(AccountPattern::parse(p), Ok(AccountPattern::Literal(_))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use iambic_core::AccountContext;
    use iambic_template::AccessRule;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn repo() -> RepositoryContext {
        RepositoryContext::new(vec![
            AccountContext::new("111111111111", "prod"),
            AccountContext::new("222222222222", "dev"),
            AccountContext::new("333333333333", "staging"),
        ])
    }

    fn role() -> Template {
        Template::new("NOQ::AWS::IAM::Role", "admin").with_property("RoleName", json!("admin"))
    }

    #[test]
    fn test_first_import_returns_observation() {
        let repo = repo();
        let config = ReconcileConfig::default();
        let ctx = MergeContext::new(&repo, &config, now());
        let observed = role();
        assert_eq!(merge(None, &observed, &ctx).unwrap(), observed);
    }

    #[test]
    fn test_type_mismatch_is_conflict() {
        let repo = repo();
        let config = ReconcileConfig::default();
        let ctx = MergeContext::new(&repo, &config, now());
        let mut observed = role();
        observed.template_type = "NOQ::AWS::IAM::User".into();
        let err = merge(Some(&role()), &observed, &ctx).unwrap_err();
        assert_eq!(err.kind(), iambic_core::ErrorKind::MergeConflict);
    }

    #[test]
    fn test_iambic_only_fields_come_from_existing() {
        let repo = repo();
        let config = ReconcileConfig::default();
        let ctx = MergeContext::new(&repo, &config, now());
        let mut existing = role()
            .with_owner("platform")
            .with_notes("break-glass role")
            .with_access_rule(AccessRule::new("alice", AccessModel::default()));
        existing.metadata_comments.push("properties.RoleName", "# keep");

        let merged = merge(Some(&existing), &role(), &ctx).unwrap();
        assert_eq!(merged, existing);
    }

    #[test]
    fn test_schema_iambic_only_attribute_is_never_taken_from_observation() {
        let repo = repo().with_schemas(
            iambic_template::SchemaRegistry::builtin().with(
                iambic_template::TemplateSchema::new("NOQ::AWS::IAM::Role")
                    .with_required("RoleName")
                    .with_iambic_only("Justification"),
            ),
        );
        let config = ReconcileConfig::default();
        let ctx = MergeContext::new(&repo, &config, now());
        let existing = role().with_property("Justification", json!("keep"));

        let differs = role().with_property("Justification", json!("other"));
        let merged = merge(Some(&existing), &differs, &ctx).unwrap();
        assert_eq!(merged.properties["Justification"], Attribute::Scalar(json!("keep")));

        let merged = merge(Some(&existing), &role(), &ctx).unwrap();
        assert_eq!(merged.properties["Justification"], Attribute::Scalar(json!("keep")));

        let merged = merge(Some(&role()), &differs, &ctx).unwrap();
        assert!(!merged.properties.contains_key("Justification"));
    }

    #[test]
    fn test_relative_expiry_is_pinned() {
        let repo = repo();
        let config = ReconcileConfig::default();
        let ctx = MergeContext::new(&repo, &config, now());
        let existing = role().with_access_rule(AccessRule::new(
            "alice",
            AccessModel::default().with_expires_at(TemporalExpression::Relative("in 3 days".into())),
        ));

        let merged = merge(Some(&existing), &role(), &ctx).unwrap();
        assert_eq!(
            merged.access_rules[0].access.expires_at,
            Some(TemporalExpression::Absolute(now() + chrono::Duration::days(3)))
        );
        assert!(!merged.access_rules[0].access.deleted);
    }

    #[test]
    fn test_expired_template_becomes_tombstone() {
        let repo = repo();
        let config = ReconcileConfig::default();
        let ctx = MergeContext::new(&repo, &config, now());
        let existing = role().with_access(
            AccessModel::default()
                .with_expires_at(TemporalExpression::Absolute(now() - chrono::Duration::hours(1))),
        );
        let observed = role().with_property("Description", json!("added out of band"));

        let merged = merge(Some(&existing), &observed, &ctx).unwrap();
        assert!(merged.access.deleted);
        assert!(merged.property("Description").is_none());
    }

    #[test]
    fn test_slice_narrowed_when_resource_left_accounts() {
        let repo = repo();
        let config = ReconcileConfig::default();
        let ctx = MergeContext::new(&repo, &config, now());
        let expiry = TemporalExpression::Absolute(now() + chrono::Duration::days(30));
        let existing = role().with_property(
            "Description",
            Attribute::Sliced(vec![
                Slice::new(
                    AccessModel::including(["prod", "dev"]).with_expires_at(expiry.clone()),
                    json!("temp"),
                ),
                Slice::everywhere(json!("base")),
            ]),
        );
        // dev reverted to the base value out of band
        let observed = role().with_property(
            "Description",
            Attribute::Sliced(vec![
                Slice::new(AccessModel::including(["prod"]), json!("temp")),
                Slice::new(AccessModel::including(["dev", "staging"]), json!("base")),
            ]),
        );

        let merged = merge(Some(&existing), &observed, &ctx).unwrap();
        let Some(Attribute::Sliced(slices)) = merged.property("Description") else {
            panic!("Description should stay sliced");
        };
        assert_eq!(slices[0].access.included_accounts, vec!["prod"]);
        assert_eq!(slices[0].access.expires_at, Some(expiry));
        assert_eq!(slices[1], Slice::everywhere(json!("base")));
    }

    #[test]
    fn test_new_account_widens_explicit_slice() {
        let repo = repo();
        let config = ReconcileConfig::default();
        let ctx = MergeContext::new(&repo, &config, now());
        let existing = role().with_property(
            "Description",
            Attribute::Sliced(vec![
                Slice::new(AccessModel::including(["prod"]), json!("a")),
                Slice::new(AccessModel::including(["dev"]), json!("b")),
            ]),
        );
        let observed = role().with_property(
            "Description",
            Attribute::Sliced(vec![
                Slice::new(AccessModel::including(["prod", "staging"]), json!("a")),
                Slice::new(AccessModel::including(["dev"]), json!("b")),
            ]),
        );

        let merged = merge(Some(&existing), &observed, &ctx).unwrap();
        let Some(Attribute::Sliced(slices)) = merged.property("Description") else {
            panic!("Description should stay sliced");
        };
        assert_eq!(slices[0].access.included_accounts, vec!["prod", "staging"]);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_attribute_gone_everywhere_is_dropped() {
        let repo = repo();
        let config = ReconcileConfig::default();
        let ctx = MergeContext::new(&repo, &config, now());
        let existing = role().with_property("Description", json!("old"));
        let merged = merge(Some(&existing), &role(), &ctx).unwrap();
        assert!(merged.property("Description").is_none());
    }

    #[test]
    fn test_collection_entry_order_is_kept_when_unchanged() {
        let repo = repo();
        let config = ReconcileConfig::default();
        let ctx = MergeContext::new(&repo, &config, now());
        let tags = |items: Vec<Slice>| Attribute::Collection {
            key_field: "Key".into(),
            items,
        };
        let existing = role().with_property(
            "Tags",
            tags(vec![
                Slice::everywhere(json!({"Key": "z", "Value": "1"})),
                Slice::everywhere(json!({"Key": "a", "Value": "2"})),
            ]),
        );
        let observed = role().with_property(
            "Tags",
            tags(vec![
                Slice::everywhere(json!({"Key": "a", "Value": "2"})),
                Slice::everywhere(json!({"Key": "z", "Value": "1"})),
            ]),
        );

        let merged = merge(Some(&existing), &observed, &ctx).unwrap();
        assert_eq!(merged.property("Tags"), existing.property("Tags"));
    }

    #[test]
    fn test_kind_mismatch_is_conflict() {
        let repo = repo();
        let config = ReconcileConfig::default();
        let ctx = MergeContext::new(&repo, &config, now());
        let existing = role().with_property("Tags", json!("not-a-collection"));
        let observed = role().with_property(
            "Tags",
            Attribute::Collection {
                key_field: "Key".into(),
                items: vec![Slice::everywhere(json!({"Key": "a"}))],
            },
        );
        let err = merge(Some(&existing), &observed, &ctx).unwrap_err();
        assert_eq!(err.kind(), iambic_core::ErrorKind::MergeConflict);
    }

    #[test]
    fn test_widenable() {
        assert!(widenable(&AccessModel::including(["prod"])));
        assert!(widenable(&AccessModel::including(["example.com", "Prod (legacy)"])));
        assert!(!widenable(&AccessModel::default()));
        assert!(!widenable(&AccessModel::including(["pro*"])));
        assert!(!widenable(&AccessModel::excluding(["dev"])));
    }
}
