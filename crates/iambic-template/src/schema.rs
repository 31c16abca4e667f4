//! Template schemas.
//!
//! A [`TemplateSchema`] describes what the engines need to know about one
//! `template_type`: which attributes must resolve for the resource to exist,
//! which attributes are keyed collections, which attributes have no provider
//! representation, and how many concurrent provider operations the type
//! tolerates.

use std::collections::{BTreeMap, BTreeSet};

use iambic_core::{IambicError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::access::AccessModel;
use crate::attribute::{Attribute, Slice};
use crate::template::Template;

/// Per-type description used by grouping, merge and resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSchema {
    /// The `template_type` this schema describes.
    pub template_type: String,
    /// Attributes without which the resource is not applicable to an account.
    #[serde(default)]
    pub required: BTreeSet<String>,
    /// Collection attributes mapped to the field identifying each entry.
    #[serde(default)]
    pub collections: BTreeMap<String, String>,
    /// Attributes sourced solely from the template file.
    #[serde(default)]
    pub iambic_only: BTreeSet<String>,
    /// Ceiling on concurrent provider operations for this type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl TemplateSchema {
    /// Create a schema with no constraints.
    pub fn new(template_type: impl Into<String>) -> Self {
        Self {
            template_type: template_type.into(),
            required: BTreeSet::new(),
            collections: BTreeMap::new(),
            iambic_only: BTreeSet::new(),
            max_concurrency: None,
        }
    }

    /// Mark an attribute as required.
    #[must_use]
    pub fn with_required(mut self, attribute: impl Into<String>) -> Self {
        self.required.insert(attribute.into());
        self
    }

    /// Declare a keyed collection attribute.
    #[must_use]
    pub fn with_collection(mut self, attribute: impl Into<String>, key_field: impl Into<String>) -> Self {
        self.collections.insert(attribute.into(), key_field.into());
        self
    }

    /// Declare an attribute with no provider representation.
    #[must_use]
    pub fn with_iambic_only(mut self, attribute: impl Into<String>) -> Self {
        self.iambic_only.insert(attribute.into());
        self
    }

    /// Set the concurrency ceiling.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    /// Identity key of a collection attribute.
    #[must_use]
    pub fn collection_key(&self, attribute: &str) -> Option<&str> {
        self.collections.get(attribute).map(String::as_str)
    }

    /// Rewrite hand-written list attributes into keyed collections.
    ///
    /// A collection attribute written as a plain list of objects is converted
    /// entry by entry; access fields written inline on an entry
    /// (`included_accounts`, `expires_at`, ...) become that entry's scope.
    pub fn normalize(&self, template: &mut Template) -> Result<()> {
        for (attribute, key_field) in &self.collections {
            let Some(Attribute::Scalar(Value::Array(entries))) = template.properties.get(attribute)
            else {
                continue;
            };

            let mut items = Vec::with_capacity(entries.len());
            for entry in entries {
                let slice: Slice = split_inline_access(entry).map_err(|e| {
                    IambicError::validation_at(
                        template.identifier.clone(),
                        format!("properties.{attribute}"),
                        e.to_string(),
                    )
                })?;
                items.push(slice);
            }

            template.properties.insert(
                attribute.clone(),
                Attribute::Collection {
                    key_field: key_field.clone(),
                    items,
                },
            );
        }
        Ok(())
    }
}

const ACCESS_FIELDS: &[&str] = &[
    "included_accounts",
    "excluded_accounts",
    "included_orgs",
    "excluded_orgs",
    "expires_at",
    "deleted",
];

fn split_inline_access(entry: &Value) -> std::result::Result<Slice, serde_json::Error> {
    let Value::Object(fields) = entry else {
        return Ok(Slice::everywhere(entry.clone()));
    };

    let mut access = serde_json::Map::new();
    let mut value = serde_json::Map::new();
    for (name, field) in fields {
        if ACCESS_FIELDS.contains(&name.as_str()) {
            access.insert(name.clone(), field.clone());
        } else {
            value.insert(name.clone(), field.clone());
        }
    }

    let access: AccessModel = serde_json::from_value(Value::Object(access))?;
    Ok(Slice::new(access, Value::Object(value)))
}

/// Known template types.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, TemplateSchema>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in provider types.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(
            TemplateSchema::new("NOQ::AWS::IAM::Role")
                .with_required("RoleName")
                .with_collection("Tags", "Key")
                .with_collection("InlinePolicies", "PolicyName")
                .with_collection("ManagedPolicies", "PolicyArn"),
        );
        registry.register(
            TemplateSchema::new("NOQ::AWS::IAM::User")
                .with_required("UserName")
                .with_collection("Tags", "Key")
                .with_collection("InlinePolicies", "PolicyName")
                .with_collection("ManagedPolicies", "PolicyArn"),
        );
        registry.register(
            TemplateSchema::new("NOQ::AWS::IAM::Group")
                .with_required("GroupName")
                .with_collection("InlinePolicies", "PolicyName")
                .with_collection("ManagedPolicies", "PolicyArn"),
        );
        registry.register(
            TemplateSchema::new("NOQ::AWS::IAM::ManagedPolicy")
                .with_required("PolicyName")
                .with_required("PolicyDocument")
                .with_collection("Tags", "Key"),
        );
        registry.register(
            TemplateSchema::new("NOQ::AWS::IdentityCenter::PermissionSet")
                .with_required("Name")
                .with_collection("Tags", "Key")
                .with_collection("AwsManagedPolicies", "Arn")
                .with_max_concurrency(10),
        );
        registry.register(
            TemplateSchema::new("NOQ::Okta::Group")
                .with_required("Name")
                .with_collection("Members", "Username"),
        );
        registry.register(TemplateSchema::new("NOQ::Okta::User").with_required("Username"));
        registry.register(
            TemplateSchema::new("NOQ::Okta::App")
                .with_required("Name")
                .with_collection("Assignments", "User"),
        );
        registry.register(
            TemplateSchema::new("NOQ::AzureAD::Group")
                .with_required("Name")
                .with_collection("Members", "Name"),
        );
        registry.register(TemplateSchema::new("NOQ::AzureAD::User").with_required("Username"));
        registry.register(
            TemplateSchema::new("NOQ::GoogleWorkspace::Group")
                .with_required("Email")
                .with_collection("Members", "Email"),
        );

        registry
    }

    /// Add or replace a schema.
    pub fn register(&mut self, schema: TemplateSchema) {
        self.schemas.insert(schema.template_type.clone(), schema);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, schema: TemplateSchema) -> Self {
        self.register(schema);
        self
    }

    /// Look up a schema.
    #[must_use]
    pub fn get(&self, template_type: &str) -> Option<&TemplateSchema> {
        self.schemas.get(template_type)
    }

    /// Look up the schema for a template, failing validation if unknown.
    pub fn schema_for(&self, template: &Template) -> Result<&TemplateSchema> {
        self.get(&template.template_type).ok_or_else(|| {
            IambicError::validation_at(
                template.identifier.clone(),
                "template_type",
                format!("unknown template_type '{}'", template.template_type),
            )
        })
    }

    /// Concurrency ceiling for a type, falling back to `default`.
    #[must_use]
    pub fn max_concurrency(&self, template_type: &str, default: usize) -> usize {
        self.get(template_type)
            .and_then(|s| s.max_concurrency)
            .unwrap_or(default)
            .max(1)
    }

    /// Registered type tags.
    pub fn template_types(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_permission_set_is_throttled() {
        let registry = SchemaRegistry::builtin();
        assert_eq!(
            registry.max_concurrency("NOQ::AWS::IdentityCenter::PermissionSet", 25),
            10
        );
        assert_eq!(registry.max_concurrency("NOQ::AWS::IAM::Role", 25), 25);
        assert_eq!(registry.max_concurrency("NOQ::Unknown::Thing", 0), 1);
    }

    #[test]
    fn test_schema_for_unknown_type() {
        let registry = SchemaRegistry::builtin();
        let template = Template::new("NOQ::AWS::IAM::Nope", "x");
        let err = registry.schema_for(&template).unwrap_err();
        assert!(err.to_string().contains("unknown template_type"));
    }

    #[test]
    fn test_normalize_plain_tag_list() {
        let registry = SchemaRegistry::builtin();
        let mut template = Template::new("NOQ::AWS::IAM::Role", "admin").with_property(
            "Tags",
            json!([
                {"Key": "team", "Value": "platform"},
                {"Key": "env", "Value": "prod", "included_accounts": ["prod"]}
            ]),
        );

        let schema = registry.schema_for(&template).unwrap().clone();
        schema.normalize(&mut template).unwrap();

        let Some(Attribute::Collection { key_field, items }) = template.property("Tags") else {
            panic!("tags should be a collection");
        };
        assert_eq!(key_field, "Key");
        assert!(items[0].access.is_default());
        assert_eq!(items[1].access.included_accounts, vec!["prod"]);
        assert_eq!(items[1].value, json!({"Key": "env", "Value": "prod"}));
    }

    #[test]
    fn test_normalize_reports_bad_inline_access() {
        let mut template = Template::new("NOQ::AWS::IAM::Role", "admin").with_property(
            "Tags",
            json!([{"Key": "team", "expires_at": "whenever"}]),
        );
        let schema = SchemaRegistry::builtin()
            .get("NOQ::AWS::IAM::Role")
            .cloned()
            .unwrap();
        let err = schema.normalize(&mut template).unwrap_err();
        assert!(err.to_string().contains("properties.Tags"));
    }
}
