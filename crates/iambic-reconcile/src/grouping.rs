//! Grouping Engine.
//!
//! Collapses the same logical resource, observed independently on several
//! accounts, into one template whose slices reproduce the per-account
//! variation with as few listed identifiers as possible.
//!
//! Each attribute is clustered on its own. An attribute absent on some
//! accounts is a class of its own that no slice covers. Collection
//! attributes are clustered entry by entry, matched on the entry's identity
//! key, so entry order never produces a difference.

use std::collections::{BTreeMap, BTreeSet};

use iambic_core::{AccountId, IambicError, Result};
use iambic_template::attribute::key_string;
use iambic_template::variables::templatize_value;
use iambic_template::{Attribute, RepositoryContext, Slice, Template, TemplateSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::config::ReconcileConfig;
use crate::scope::{cluster, minimal_scope, partition, slice_scope, AccountSet};

/// One account's view of a resource, as a provider collaborator fetched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedResource {
    /// Account the resource was observed on.
    pub account_id: AccountId,
    /// Raw provider attributes.
    pub attributes: Map<String, Value>,
}

impl ObservedResource {
    /// Create an observation.
    pub fn new(account_id: impl Into<AccountId>, attributes: Map<String, Value>) -> Self {
        Self {
            account_id: account_id.into(),
            attributes,
        }
    }
}

/// Normalized attributes of one account.
struct AccountView {
    index: usize,
    scalars: BTreeMap<String, Value>,
    collections: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Group per-account observations of one resource into a template.
///
/// Fails only on inconsistent input: an unknown or repeated account, an
/// empty observation list, or a collection entry without a unique identity
/// key. Those indicate a bug in the provider collaborator and are reported
/// as invariant errors.
#[instrument(skip(observed, repo, config), fields(observations = observed.len()))]
pub fn group(
    template_type: &str,
    identifier: &str,
    observed: &[ObservedResource],
    repo: &RepositoryContext,
    config: &ReconcileConfig,
) -> Result<Template> {
    let probe = Template::new(template_type, identifier);
    let schema = repo.schemas.schema_for(&probe)?;

    if observed.is_empty() {
        return Err(IambicError::invariant(format!(
            "cannot group '{identifier}' from zero observations"
        )));
    }

    let views = normalize(identifier, observed, repo, schema, config)?;
    let universe: AccountSet = views.iter().map(|v| v.index).collect();
    let all_accounts: AccountSet = (0..repo.accounts.len()).collect();
    let threshold = config.min_accounts_required_for_wildcard;

    let mut template = probe.with_access(minimal_scope(
        &universe,
        &all_accounts,
        &repo.accounts,
        threshold,
    ));

    let scalar_names: BTreeSet<&String> = views.iter().flat_map(|v| v.scalars.keys()).collect();
    for name in scalar_names {
        let values: BTreeMap<usize, Value> = views
            .iter()
            .filter_map(|v| v.scalars.get(name).map(|value| (v.index, value.clone())))
            .collect();

        if let Some(attribute) = build_attribute(&values, &universe, repo, threshold) {
            debug!(attribute = %name, kind = attribute.kind(), "Grouped attribute");
            template.properties.insert(name.clone(), attribute);
        }
    }

    for (name, key_field) in &schema.collections {
        let items = group_collection(name, &views, &universe, repo, threshold);
        if !items.is_empty() {
            debug!(attribute = %name, entries = items.len(), "Grouped collection");
            template.properties.insert(
                name.clone(),
                Attribute::Collection {
                    key_field: key_field.clone(),
                    items,
                },
            );
        }
    }

    info!(
        template_type = %template.template_type,
        identifier = %template.identifier,
        accounts = universe.len(),
        properties = template.properties.len(),
        "Grouped template"
    );
    Ok(template)
}

/// Bare scalar for a single universal class, slices otherwise.
pub(crate) fn build_attribute(
    values: &BTreeMap<usize, Value>,
    universe: &AccountSet,
    repo: &RepositoryContext,
    threshold: usize,
) -> Option<Attribute> {
    if values.is_empty() {
        return None;
    }
    let classes = partition(values);
    if let [(value, class)] = classes.as_slice() {
        if class == universe {
            return Some(Attribute::Scalar(value.clone()));
        }
    }
    Some(Attribute::Sliced(cluster(values, universe, &repo.accounts, threshold)))
}

fn group_collection(
    name: &str,
    views: &[AccountView],
    universe: &AccountSet,
    repo: &RepositoryContext,
    threshold: usize,
) -> Vec<Slice> {
    let keys: BTreeSet<&String> = views
        .iter()
        .filter_map(|v| v.collections.get(name))
        .flat_map(BTreeMap::keys)
        .collect();

    let mut items = Vec::new();
    for key in keys {
        let values: BTreeMap<usize, Value> = views
            .iter()
            .filter_map(|v| {
                v.collections
                    .get(name)
                    .and_then(|entries| entries.get(key))
                    .map(|value| (v.index, value.clone()))
            })
            .collect();

        for (value, class) in partition(&values) {
            items.push(Slice::new(
                slice_scope(&class, universe, &repo.accounts, threshold),
                value,
            ));
        }
    }
    items
}

fn normalize(
    identifier: &str,
    observed: &[ObservedResource],
    repo: &RepositoryContext,
    schema: &TemplateSchema,
    config: &ReconcileConfig,
) -> Result<Vec<AccountView>> {
    let mut seen = BTreeSet::new();
    let mut views = Vec::with_capacity(observed.len());

    for resource in observed {
        let index = repo
            .accounts
            .iter()
            .position(|a| a.account_id == resource.account_id)
            .ok_or_else(|| {
                IambicError::invariant(format!(
                    "'{identifier}' observed on unknown account '{}'",
                    resource.account_id
                ))
            })?;
        if !seen.insert(index) {
            return Err(IambicError::invariant(format!(
                "'{identifier}' observed twice on account '{}'",
                resource.account_id
            )));
        }
        let account = &repo.accounts[index];

        let mut view = AccountView {
            index,
            scalars: BTreeMap::new(),
            collections: BTreeMap::new(),
        };

        for (name, raw) in &resource.attributes {
            if raw.is_null() {
                continue;
            }
            let value = if config.templatize_account_values {
                templatize_value(raw, account)
            } else {
                raw.clone()
            };

            match schema.collection_key(name) {
                Some(key_field) => {
                    let entries = keyed_entries(identifier, name, key_field, &value, account)?;
                    view.collections.insert(name.clone(), entries);
                }
                None => {
                    view.scalars.insert(name.clone(), value);
                }
            }
        }

        views.push(view);
    }

    views.sort_by_key(|v| v.index);
    Ok(views)
}

fn keyed_entries(
    identifier: &str,
    attribute: &str,
    key_field: &str,
    value: &Value,
    account: &iambic_core::AccountContext,
) -> Result<BTreeMap<String, Value>> {
    let Value::Array(list) = value else {
        return Err(IambicError::invariant(format!(
            "'{identifier}' attribute '{attribute}' on '{}' is not a list",
            account.account_name
        )));
    };

    let mut entries = BTreeMap::new();
    for entry in list {
        let key = entry.get(key_field).and_then(key_string).ok_or_else(|| {
            IambicError::invariant(format!(
                "'{identifier}' {attribute} entry on '{}' has no '{key_field}'",
                account.account_name
            ))
        })?;
        if entries.insert(key.clone(), entry.clone()).is_some() {
            return Err(IambicError::invariant(format!(
                "'{identifier}' {attribute} on '{}' repeats key '{key}'",
                account.account_name
            )));
        }
    }
    Ok(entries)
}
