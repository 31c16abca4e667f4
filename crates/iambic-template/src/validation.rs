//! Template validation.
//!
//! Validation failures are fatal for the template they name and are
//! reported as [`IambicError::Validation`]. Account patterns are not
//! compiled here: a bad pattern only fails resolution for the accounts it is
//! evaluated against.

use std::sync::LazyLock;

use iambic_core::{IambicError, Result};
use regex::Regex;

use crate::access::AccessModel;
use crate::attribute::Attribute;
use crate::schema::SchemaRegistry;
use crate::template::Template;

static TEMPLATE_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^NOQ(::[A-Za-z0-9]+){2,}$").expect("template type regex is valid")
});

/// Normalize hand-written collections, then validate.
pub fn prepare(mut template: Template, registry: &SchemaRegistry) -> Result<Template> {
    check_type_tag(&template)?;
    let schema = registry.schema_for(&template)?;
    schema.normalize(&mut template)?;
    validate(&template, registry)?;
    Ok(template)
}

/// Check a template against its schema.
pub fn validate(template: &Template, registry: &SchemaRegistry) -> Result<()> {
    let name = template.identifier.as_str();
    if name.trim().is_empty() {
        return Err(IambicError::validation_at(
            "<unnamed>",
            "identifier",
            "identifier must not be empty",
        ));
    }

    check_type_tag(template)?;
    let schema = registry.schema_for(template)?;

    check_scope(name, "", &template.access)?;

    for (attribute, value) in &template.properties {
        let field = format!("properties.{attribute}");
        let expected_key = schema.collection_key(attribute);

        match (value, expected_key) {
            (Attribute::Scalar(_), _) => {}
            (Attribute::Sliced(_), Some(_)) => {
                return Err(IambicError::validation_at(
                    name,
                    field,
                    "collection attribute must be a keyed list, not sliced",
                ));
            }
            (Attribute::Sliced(slices), None) => {
                if slices.is_empty() {
                    return Err(IambicError::validation_at(name, field, "sliced attribute has no slices"));
                }
                for (index, slice) in slices.iter().enumerate() {
                    check_scope(name, &format!("{field}[{index}]."), &slice.access)?;
                }
            }
            (Attribute::Collection { key_field, items }, expected) => {
                if let Some(expected) = expected {
                    if key_field != expected {
                        return Err(IambicError::validation_at(
                            name,
                            field,
                            format!("collection is keyed by '{key_field}', expected '{expected}'"),
                        ));
                    }
                }
                for (index, item) in items.iter().enumerate() {
                    let item_field = format!("{field}[{index}]");
                    if item.key(key_field).is_none() {
                        return Err(IambicError::validation_at(
                            name,
                            item_field,
                            format!("entry is missing its '{key_field}' key"),
                        ));
                    }
                    check_scope(name, &format!("{item_field}."), &item.access)?;
                }
            }
        }
    }

    for (index, rule) in template.access_rules.iter().enumerate() {
        let field = format!("access_rules[{index}]");
        if rule.principal.trim().is_empty() {
            return Err(IambicError::validation_at(name, field, "principal must not be empty"));
        }
        check_scope(name, &format!("{field}."), &rule.access)?;
    }

    Ok(())
}

fn check_type_tag(template: &Template) -> Result<()> {
    if TEMPLATE_TYPE_RE.is_match(&template.template_type) {
        return Ok(());
    }
    Err(IambicError::validation_at(
        template.identifier.clone(),
        "template_type",
        format!(
            "'{}' is not of the form NOQ::<Provider>::<Resource>",
            template.template_type
        ),
    ))
}

fn check_scope(template: &str, prefix: &str, access: &AccessModel) -> Result<()> {
    if access.included_accounts.is_empty() {
        return Err(IambicError::validation_at(
            template,
            format!("{prefix}included_accounts"),
            "include list must not be empty",
        ));
    }
    if access.included_orgs.is_empty() {
        return Err(IambicError::validation_at(
            template,
            format!("{prefix}included_orgs"),
            "include list must not be empty",
        ));
    }
    Ok(())
}
