//! Plan diff: what a provider would have to change on one account.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use iambic_core::{AccountContext, AccountId, Result};
use iambic_template::attribute::key_string;
use iambic_template::{RepositoryContext, Template};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::resolution::{resolve, Resolution, ResolvedAttributeSet};

/// Kind of a proposed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Create a resource, attribute or collection entry.
    Create,
    /// Change a value in place.
    Update,
    /// Remove a resource, attribute or collection entry.
    Delete,
}

impl ChangeType {
    /// Get the string representation used in statistics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One change.
///
/// `attribute` is `None` for a resource-level create or delete; `key` is set
/// for changes to a single keyed collection entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedChange {
    /// Create, update or delete.
    pub change_type: ChangeType,
    /// Attribute the change touches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    /// Collection entry key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Live value; `None` on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Value>,
    /// Value the template asks for; `None` on delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

impl ProposedChange {
    fn resource(change_type: ChangeType, current: Option<Value>, new: Option<Value>) -> Self {
        Self {
            change_type,
            attribute: None,
            key: None,
            current,
            new,
        }
    }

    fn attribute(attribute: &str, current: Option<&Value>, new: Option<&Value>) -> Self {
        let change_type = match (current, new) {
            (None, _) => ChangeType::Create,
            (_, None) => ChangeType::Delete,
            _ => ChangeType::Update,
        };
        Self {
            change_type,
            attribute: Some(attribute.to_string()),
            key: None,
            current: current.cloned(),
            new: new.cloned(),
        }
    }

    fn entry(attribute: &str, key: &str, current: Option<&Value>, new: Option<&Value>) -> Self {
        Self {
            key: Some(key.to_string()),
            ..Self::attribute(attribute, current, new)
        }
    }
}

/// Changes for one (template, account) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountPlan {
    /// Type of the planned template.
    pub template_type: String,
    /// Identifier, resolved on the account when the template applies.
    pub identifier: String,
    /// Target account.
    pub account_id: AccountId,
    /// Target account name.
    pub account_name: String,
    /// Whether the template resolved on the account.
    pub applicable: bool,
    /// The template is not applied (`import_only`); `changes` is empty.
    #[serde(default)]
    pub read_only: bool,
    /// Differences between resolved and live state.
    #[serde(default)]
    pub changes: Vec<ProposedChange>,
}

impl AccountPlan {
    /// Whether nothing needs to change.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

fn present<'a>(attributes: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    attributes.get(name).filter(|v| !v.is_null())
}

/// Per-attribute changes between a resolved set and live provider state.
///
/// Live attributes the template does not declare are ignored. A live `null`
/// counts as absent.
#[must_use]
pub fn diff(resolved: &ResolvedAttributeSet, live: &Map<String, Value>) -> Vec<ProposedChange> {
    let names: BTreeSet<&str> = resolved
        .attributes
        .keys()
        .map(String::as_str)
        .chain(
            live.keys()
                .map(String::as_str)
                .filter(|name| resolved.declared.contains(*name)),
        )
        .collect();

    let mut changes = Vec::new();
    for name in names {
        let desired = resolved.attributes.get(name);
        let current = present(live, name);
        if desired == current {
            continue;
        }

        match (resolved.collection_keys.get(name), desired, current) {
            (Some(key_field), Some(Value::Array(want)), Some(Value::Array(have))) => {
                diff_collection(name, key_field, want, have, &mut changes);
            }
            _ => changes.push(ProposedChange::attribute(name, current, desired)),
        }
    }
    changes
}

fn entry_key(key_field: &str, entry: &Value) -> String {
    entry
        .get(key_field)
        .and_then(key_string)
        .unwrap_or_else(|| entry.to_string())
}

fn diff_collection(
    attribute: &str,
    key_field: &str,
    want: &[Value],
    have: &[Value],
    changes: &mut Vec<ProposedChange>,
) {
    let desired: BTreeMap<String, &Value> = want.iter().map(|e| (entry_key(key_field, e), e)).collect();
    let current: BTreeMap<String, &Value> = have.iter().map(|e| (entry_key(key_field, e), e)).collect();

    let keys: BTreeSet<&String> = desired.keys().chain(current.keys()).collect();
    for key in keys {
        let new = desired.get(key).copied();
        let old = current.get(key).copied();
        if new != old {
            changes.push(ProposedChange::entry(attribute, key, old, new));
        }
    }
}

/// Plan one template on one account against what the provider reports.
///
/// `live` is `None` when the resource does not exist on the account.
#[instrument(skip_all, fields(template = %template.identifier, account = %account.account_name))]
pub fn plan_account(
    template: &Template,
    account: &AccountContext,
    repo: &RepositoryContext,
    live: Option<&Map<String, Value>>,
    now: DateTime<Utc>,
) -> Result<AccountPlan> {
    let resolution = resolve(template, account, repo, now)?;
    let mut plan = AccountPlan {
        template_type: template.template_type.clone(),
        identifier: template.identifier.clone(),
        account_id: account.account_id.clone(),
        account_name: account.account_name.clone(),
        applicable: resolution.is_applicable(),
        read_only: !template.iambic_managed.allows_apply(),
        changes: Vec::new(),
    };

    if plan.read_only {
        debug!(mode = ?template.iambic_managed, "Template is read-only, no changes planned");
        return Ok(plan);
    }

    plan.changes = match (&resolution, live) {
        (Resolution::Applicable(set), None) => {
            plan.identifier = set.identifier.clone();
            vec![ProposedChange::resource(
                ChangeType::Create,
                None,
                Some(Value::Object(set.to_raw())),
            )]
        }
        (Resolution::Applicable(set), Some(live)) => {
            plan.identifier = set.identifier.clone();
            diff(set, live)
        }
        (Resolution::NotApplicable(reason), Some(live)) => {
            debug!(?reason, "Live resource no longer applicable");
            vec![ProposedChange::resource(
                ChangeType::Delete,
                Some(Value::Object(live.clone())),
                None,
            )]
        }
        (Resolution::NotApplicable(_), None) => Vec::new(),
    };

    debug!(changes = plan.changes.len(), "Planned account");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use iambic_template::{AccessModel, ManagedMode, Slice};
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        let Value::Object(map) = value else {
            panic!("fixture must be an object");
        };
        map
    }

    fn resolved(attributes: Value) -> ResolvedAttributeSet {
        let attributes = object(attributes).into_iter().collect::<BTreeMap<_, _>>();
        ResolvedAttributeSet {
            template_type: "NOQ::AWS::IAM::Role".into(),
            identifier: "admin".into(),
            account_id: "1".into(),
            declared: attributes.keys().cloned().collect(),
            collection_keys: BTreeMap::from([("Tags".to_string(), "Key".to_string())]),
            attributes,
            access_rules: Vec::new(),
        }
    }

    #[test]
    fn test_diff_scalar_update_and_create() {
        let set = resolved(json!({"RoleName": "admin", "Description": "new"}));
        let live = object(json!({"RoleName": "admin", "MaxSessionDuration": 3600}));

        let changes = diff(&set, &live);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Create);
        assert_eq!(changes[0].attribute.as_deref(), Some("Description"));
    }

    #[test]
    fn test_diff_declared_attribute_removed() {
        let mut set = resolved(json!({"RoleName": "admin"}));
        set.declared.insert("Description".into());
        let live = object(json!({"RoleName": "admin", "Description": "old"}));

        let changes = diff(&set, &live);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::Delete);
        assert_eq!(changes[0].current, Some(json!("old")));
    }

    #[test]
    fn test_diff_live_null_is_absent() {
        let set = resolved(json!({"RoleName": "admin"}));
        let live = object(json!({"RoleName": "admin", "Description": null}));
        assert!(diff(&set, &live).is_empty());
    }

    #[test]
    fn test_diff_collection_by_key_not_index() {
        let set = resolved(json!({"Tags": [
            {"Key": "env", "Value": "prod"},
            {"Key": "team", "Value": "infra"},
        ]}));
        let live = object(json!({"Tags": [
            {"Key": "team", "Value": "platform"},
            {"Key": "env", "Value": "prod"},
            {"Key": "stale", "Value": "x"},
        ]}));

        let changes = diff(&set, &live);
        let summary: Vec<_> = changes
            .iter()
            .map(|c| (c.change_type, c.key.clone().unwrap_or_default()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (ChangeType::Delete, "stale".to_string()),
                (ChangeType::Update, "team".to_string()),
            ]
        );
    }

    fn repo() -> RepositoryContext {
        RepositoryContext::new(vec![
            AccountContext::new("1", "prod"),
            AccountContext::new("2", "staging"),
        ])
    }

    fn role() -> Template {
        Template::new("NOQ::AWS::IAM::Role", "admin")
            .with_property("RoleName", json!("admin"))
            .with_access(AccessModel::including(["prod"]))
    }

    #[test]
    fn test_plan_create_when_absent() {
        let repo = repo();
        let plan = plan_account(&role(), &repo.accounts[0], &repo, None, Utc::now()).unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].change_type, ChangeType::Create);
        assert!(plan.changes[0].attribute.is_none());
    }

    #[test]
    fn test_plan_delete_when_out_of_scope() {
        let repo = repo();
        let live = object(json!({"RoleName": "admin"}));
        let plan = plan_account(&role(), &repo.accounts[1], &repo, Some(&live), Utc::now()).unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].change_type, ChangeType::Delete);
    }

    #[test]
    fn test_plan_noop_when_in_sync() {
        let repo = repo();
        let live = object(json!({"RoleName": "admin"}));
        let plan = plan_account(&role(), &repo.accounts[0], &repo, Some(&live), Utc::now()).unwrap();
        assert!(plan.is_noop());
        assert!(!plan.read_only);
    }

    #[test]
    fn test_plan_import_only_is_read_only() {
        let repo = repo();
        let template = role().with_managed_mode(ManagedMode::ImportOnly);
        let plan = plan_account(&template, &repo.accounts[0], &repo, None, Utc::now()).unwrap();
        assert!(plan.read_only);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_plan_expired_slice_deletes_attribute() {
        let repo = repo();
        let past = iambic_template::TemporalExpression::parse("2020-01-01").unwrap();
        let template = Template::new("NOQ::AWS::IAM::Role", "admin")
            .with_property("RoleName", json!("admin"))
            .with_property(
                "Description",
                iambic_template::Attribute::Sliced(vec![Slice::new(
                    AccessModel::everywhere().with_expires_at(past),
                    json!("temporary"),
                )]),
            );
        let live = object(json!({"RoleName": "admin", "Description": "temporary"}));

        let plan = plan_account(&template, &repo.accounts[0], &repo, Some(&live), Utc::now()).unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].change_type, ChangeType::Delete);
        assert_eq!(plan.changes[0].attribute.as_deref(), Some("Description"));
    }
}
