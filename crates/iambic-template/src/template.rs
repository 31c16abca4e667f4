//! The template entity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::access::AccessModel;
use crate::attribute::Attribute;

/// How IAMbic treats a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagedMode {
    /// Not set; behaves like `read_and_write`.
    #[default]
    Undefined,
    /// Imported from and applied to the provider.
    ReadAndWrite,
    /// Imported, never applied.
    ImportOnly,
    /// Applied even when the provider drifts.
    Enforced,
    /// Neither imported nor applied.
    Disabled,
}

impl ManagedMode {
    fn is_undefined(&self) -> bool {
        matches!(self, ManagedMode::Undefined)
    }

    /// Whether plan/apply may emit changes for this template.
    #[must_use]
    pub fn allows_apply(&self) -> bool {
        !matches!(self, ManagedMode::ImportOnly | ManagedMode::Disabled)
    }
}

/// One inline comment attached to a template document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEntry {
    /// Location the storage layer anchors the comment to.
    pub path: String,
    /// Comment text.
    pub comment: String,
}

/// Comments round-tripped by the storage layer.
///
/// The engines carry this value through unchanged and never inspect it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentMetadata(Vec<CommentEntry>);

impl CommentMetadata {
    /// Create empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a comment.
    pub fn push(&mut self, path: impl Into<String>, comment: impl Into<String>) {
        self.0.push(CommentEntry {
            path: path.into(),
            comment: comment.into(),
        });
    }

    /// Comments in document order.
    #[must_use]
    pub fn entries(&self) -> &[CommentEntry] {
        &self.0
    }

    /// Whether there are no comments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A temporary or conditional grant to a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// User or group receiving access.
    pub principal: String,
    /// Where and until when the grant applies.
    #[serde(flatten)]
    pub access: AccessModel,
}

impl AccessRule {
    /// Create an access rule.
    pub fn new(principal: impl Into<String>, access: AccessModel) -> Self {
        Self {
            principal: principal.into(),
            access,
        }
    }
}

/// One logical resource across every account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Namespaced type tag, `NOQ::<Provider>::<Resource>`.
    pub template_type: String,
    /// Resource name; may contain variable tokens.
    pub identifier: String,
    /// Management mode.
    #[serde(default, skip_serializing_if = "ManagedMode::is_undefined")]
    pub iambic_managed: ManagedMode,
    /// Template-wide scope and lifecycle.
    #[serde(flatten)]
    pub access: AccessModel,
    /// Responsible team or person.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Provider-observable attributes, in stable key order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Attribute>,
    /// Principal grants, orthogonal to properties.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_rules: Vec<AccessRule>,
    /// Opaque comment metadata.
    #[serde(default, skip_serializing_if = "CommentMetadata::is_empty")]
    pub metadata_comments: CommentMetadata,
}

impl Template {
    /// Create an empty template reaching every account.
    pub fn new(template_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            template_type: template_type.into(),
            identifier: identifier.into(),
            iambic_managed: ManagedMode::Undefined,
            access: AccessModel::default(),
            owner: None,
            notes: None,
            properties: BTreeMap::new(),
            access_rules: Vec::new(),
            metadata_comments: CommentMetadata::new(),
        }
    }

    /// Set a property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, attribute: impl Into<Attribute>) -> Self {
        self.properties.insert(name.into(), attribute.into());
        self
    }

    /// Set the template-wide scope.
    #[must_use]
    pub fn with_access(mut self, access: AccessModel) -> Self {
        self.access = access;
        self
    }

    /// Set the management mode.
    #[must_use]
    pub fn with_managed_mode(mut self, mode: ManagedMode) -> Self {
        self.iambic_managed = mode;
        self
    }

    /// Append an access rule.
    #[must_use]
    pub fn with_access_rule(mut self, rule: AccessRule) -> Self {
        self.access_rules.push(rule);
        self
    }

    /// Set the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Set the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Look up a property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Attribute> {
        self.properties.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ROLE_YAML: &str = r"
template_type: NOQ::AWS::IAM::Role
identifier: '{{var.account_name}}_admin'
iambic_managed: import_only
excluded_accounts: [sandbox]
owner: platform-team
properties:
  RoleName: '{{var.account_name}}_admin'
  MaxSessionDuration:
    sliced:
      - included_accounts: [prod]
        value: 3600
      - value: 43200
access_rules:
  - principal: alice@example.com
    included_accounts: [prod]
    expires_at: '2030-01-01'
";

    #[test]
    fn test_parse_full_template() {
        let template: Template = serde_yaml::from_str(ROLE_YAML).unwrap();
        assert_eq!(template.template_type, "NOQ::AWS::IAM::Role");
        assert_eq!(template.iambic_managed, ManagedMode::ImportOnly);
        assert_eq!(template.access.excluded_accounts, vec!["sandbox"]);
        assert_eq!(template.access.included_accounts, vec!["*"]);
        assert_eq!(template.owner.as_deref(), Some("platform-team"));
        assert_eq!(
            template.property("RoleName"),
            Some(&Attribute::Scalar(json!("{{var.account_name}}_admin")))
        );
        assert_eq!(template.property("MaxSessionDuration").map(Attribute::kind), Some("sliced"));
        assert_eq!(template.access_rules.len(), 1);
        assert!(template.access_rules[0].access.expires_at.is_some());
    }

    #[test]
    fn test_yaml_roundtrip_is_stable() {
        let template: Template = serde_yaml::from_str(ROLE_YAML).unwrap();
        let emitted = serde_yaml::to_string(&template).unwrap();
        let reparsed: Template = serde_yaml::from_str(&emitted).unwrap();
        assert_eq!(reparsed, template);
        assert_eq!(serde_yaml::to_string(&reparsed).unwrap(), emitted);
    }

    #[test]
    fn test_emits_type_first_and_skips_defaults() {
        let template = Template::new("NOQ::Okta::Group", "engineering")
            .with_property("Name", json!("engineering"));
        let emitted = serde_yaml::to_string(&template).unwrap();
        assert!(emitted.starts_with("template_type: NOQ::Okta::Group"));
        assert!(!emitted.contains("iambic_managed"));
        assert!(!emitted.contains("included_accounts"));
        assert!(!emitted.contains("metadata_comments"));
    }

    #[test]
    fn test_managed_mode_allows_apply() {
        assert!(ManagedMode::Undefined.allows_apply());
        assert!(ManagedMode::Enforced.allows_apply());
        assert!(!ManagedMode::ImportOnly.allows_apply());
        assert!(!ManagedMode::Disabled.allows_apply());
    }

    #[test]
    fn test_comment_metadata_is_carried() {
        let mut template = Template::new("NOQ::Okta::Group", "engineering");
        template.metadata_comments.push("properties.Name", "# owned by IT");
        let emitted = serde_yaml::to_string(&template).unwrap();
        let reparsed: Template = serde_yaml::from_str(&emitted).unwrap();
        assert_eq!(reparsed.metadata_comments.entries()[0].comment, "# owned by IT");
    }
}
