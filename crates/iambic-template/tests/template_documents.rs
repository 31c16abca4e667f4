//! Loading, validating and writing back realistic template documents.

mod common;

use iambic_template::{io, validation, Attribute, ManagedMode, TemporalExpression};
use serde_json::json;

const PERMISSION_SET: &str = r#"
template_type: NOQ::AWS::IdentityCenter::PermissionSet
identifier: "{{var.env}}-readonly"
iambic_managed: enforced
included_orgs: [o-main]
properties:
  Name: "{{var.env}}-readonly"
  SessionDuration:
    sliced:
      - included_accounts: [prod]
        value: PT1H
      - value: PT8H
  Tags:
    - Key: owner
      Value: "secops@{{var.domain}}"
    - Key: temporary
      Value: "yes"
      included_accounts: [staging]
      expires_at: in 3 days
access_rules:
  - principal: oncall@example.com
    included_accounts: [prod]
    expires_at: 2031-05-01
"#;

#[test]
fn test_prepare_permission_set() {
    common::init_test_logging();
    let repo = common::repository();

    let template = io::from_yaml_str(PERMISSION_SET).unwrap();
    let template = validation::prepare(template, &repo.schemas).unwrap();

    assert_eq!(template.iambic_managed, ManagedMode::Enforced);
    assert_eq!(template.access.included_orgs, vec!["o-main"]);

    let Some(Attribute::Collection { key_field, items }) = template.property("Tags") else {
        panic!("Tags should normalize into a keyed collection");
    };
    assert_eq!(key_field, "Key");
    assert_eq!(items.len(), 2);
    assert_eq!(
        items[1].access.expires_at,
        Some(TemporalExpression::Relative("in 3 days".into()))
    );
    assert_eq!(items[1].value, json!({"Key": "temporary", "Value": "yes"}));
}

#[test]
fn test_written_document_reloads_identically() {
    let repo = common::repository();
    let template =
        validation::prepare(io::from_yaml_str(PERMISSION_SET).unwrap(), &repo.schemas).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("permission_sets/readonly.yaml");
    io::store(&path, &template).unwrap();

    let reloaded = io::load(&path).unwrap();
    assert_eq!(reloaded, template);
    validation::validate(&reloaded, &repo.schemas).unwrap();
}

#[test]
fn test_org_scope_excludes_org_less_account() {
    let repo = common::repository();
    let template = io::from_yaml_str(PERMISSION_SET).unwrap();

    let reached: Vec<&str> = repo
        .accounts
        .iter()
        .filter(|a| template.access.match_account(a).unwrap().is_some())
        .map(|a| a.account_name.as_str())
        .collect();
    assert_eq!(reached, vec!["prod", "staging"]);
}

#[test]
fn test_unknown_type_is_validation_error() {
    let repo = common::repository();
    let template = io::from_yaml_str(
        "template_type: NOQ::Jira::Project\nidentifier: board\naccess_rules: []\n",
    )
    .unwrap();

    let err = validation::prepare(template, &repo.schemas).unwrap_err();
    assert_eq!(err.kind(), iambic_core::ErrorKind::Validation);
}
