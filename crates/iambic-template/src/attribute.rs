//! Template attribute values.
//!
//! Every property of a template is one of three shapes, and all engines
//! pattern-match on the tag instead of inspecting values at runtime:
//!
//! - [`Attribute::Scalar`]: one value for every account the template reaches
//! - [`Attribute::Sliced`]: per-account variation, one [`Slice`] per value
//! - [`Attribute::Collection`]: a nested list resource (tags, inline
//!   policies) whose entries are identified by `key_field`, each entry scoped
//!   by its own access model
//!
//! On disk a sliced attribute is written as `{sliced: [...]}` and a
//! collection as `{key_field: ..., items: [...]}`. Any other value is a
//! scalar, including provider-defined condition blocks, which pass through
//! verbatim.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::access::AccessModel;

/// One conditionally applicable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    /// Where and until when the value applies.
    #[serde(flatten)]
    pub access: AccessModel,
    /// The value. `null` stands for "attribute absent on these accounts".
    #[serde(default)]
    pub value: Value,
}

impl Slice {
    /// Create a slice.
    pub fn new(access: AccessModel, value: Value) -> Self {
        Self { access, value }
    }

    /// Create a slice applying everywhere.
    pub fn everywhere(value: Value) -> Self {
        Self::new(AccessModel::default(), value)
    }

    /// The identity key of a collection entry, rendered as a string.
    #[must_use]
    pub fn key(&self, key_field: &str) -> Option<String> {
        self.value.get(key_field).and_then(key_string)
    }
}

/// Render a collection identity key value as a comparable string.
#[must_use]
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A template property.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// Same value wherever the template applies.
    Scalar(Value),
    /// Value varies by account.
    Sliced(Vec<Slice>),
    /// Nested list resource keyed by `key_field`.
    Collection {
        /// Field of each entry that identifies it (e.g. `Key` for tags).
        key_field: String,
        /// Entries, possibly several per key with disjoint scopes.
        items: Vec<Slice>,
    },
}

impl Attribute {
    /// Short name of the variant, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Attribute::Scalar(_) => "scalar",
            Attribute::Sliced(_) => "sliced",
            Attribute::Collection { .. } => "collection",
        }
    }

    /// Slices of a sliced attribute or entries of a collection.
    #[must_use]
    pub fn slices(&self) -> &[Slice] {
        match self {
            Attribute::Scalar(_) => &[],
            Attribute::Sliced(slices) => slices,
            Attribute::Collection { items, .. } => items,
        }
    }

    /// Mutable access to slices or entries.
    pub fn slices_mut(&mut self) -> Option<&mut Vec<Slice>> {
        match self {
            Attribute::Scalar(_) => None,
            Attribute::Sliced(slices) => Some(slices),
            Attribute::Collection { items, .. } => Some(items),
        }
    }

    /// Whether any slice or entry carries the tombstone flag.
    #[must_use]
    pub fn has_tombstones(&self) -> bool {
        self.slices().iter().any(|s| s.access.deleted)
    }
}

impl From<Value> for Attribute {
    fn from(value: Value) -> Self {
        Attribute::Scalar(value)
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum AttributeRef<'a> {
    Sliced {
        sliced: &'a [Slice],
    },
    Collection {
        key_field: &'a str,
        items: &'a [Slice],
    },
}

impl Serialize for Attribute {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Attribute::Scalar(value) => value.serialize(serializer),
            Attribute::Sliced(slices) => AttributeRef::Sliced { sliced: slices }.serialize(serializer),
            Attribute::Collection { key_field, items } => AttributeRef::Collection {
                key_field,
                items,
            }
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Attribute {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        let Value::Object(map) = raw else {
            return Ok(Attribute::Scalar(raw));
        };

        if map.len() == 1 && map.contains_key("sliced") {
            let slices = take_slices(map, "sliced").map_err(serde::de::Error::custom)?;
            return Ok(Attribute::Sliced(slices));
        }

        if map.len() == 2 && map.contains_key("key_field") && map.contains_key("items") {
            let key_field = match map.get("key_field") {
                Some(Value::String(k)) => k.clone(),
                _ => return Err(serde::de::Error::custom("key_field must be a string")),
            };
            let items = take_slices(map, "items").map_err(serde::de::Error::custom)?;
            return Ok(Attribute::Collection { key_field, items });
        }

        Ok(Attribute::Scalar(Value::Object(map)))
    }
}

fn take_slices(mut map: Map<String, Value>, field: &str) -> Result<Vec<Slice>, serde_json::Error> {
    let list = map.remove(field).unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_roundtrip() {
        let attr: Attribute = serde_yaml::from_str("Deny").unwrap();
        assert_eq!(attr, Attribute::Scalar(json!("Deny")));
        assert_eq!(serde_yaml::to_string(&attr).unwrap().trim(), "Deny");
    }

    #[test]
    fn test_condition_block_is_opaque_scalar() {
        let attr: Attribute =
            serde_yaml::from_str("StringEquals: {\"aws:PrincipalOrgID\": o-123}").unwrap();
        assert!(matches!(attr, Attribute::Scalar(Value::Object(_))));
    }

    #[test]
    fn test_sliced_parse() {
        let yaml = r"
sliced:
  - included_accounts: [acc1, acc2]
    value: Deny
  - included_accounts: [acc3]
    value: Allow
";
        let attr: Attribute = serde_yaml::from_str(yaml).unwrap();
        let Attribute::Sliced(slices) = &attr else {
            panic!("expected sliced attribute, got {}", attr.kind());
        };
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].access.included_accounts, vec!["acc1", "acc2"]);
        assert_eq!(slices[1].value, json!("Allow"));
    }

    #[test]
    fn test_collection_parse() {
        let yaml = r"
key_field: Key
items:
  - value: {Key: team, Value: platform}
  - excluded_accounts: [dev]
    value: {Key: env, Value: prod}
";
        let attr: Attribute = serde_yaml::from_str(yaml).unwrap();
        let Attribute::Collection { key_field, items } = &attr else {
            panic!("expected collection, got {}", attr.kind());
        };
        assert_eq!(key_field, "Key");
        assert_eq!(items[0].key("Key").as_deref(), Some("team"));
        assert_eq!(items[1].access.excluded_accounts, vec!["dev"]);
    }

    #[test]
    fn test_sliced_serializes_under_sliced_key() {
        let attr = Attribute::Sliced(vec![Slice::new(AccessModel::including(["acc3"]), json!("Allow"))]);
        let value = serde_json::to_value(&attr).unwrap();
        assert_eq!(
            value,
            json!({"sliced": [{"included_accounts": ["acc3"], "value": "Allow"}]})
        );
    }

    #[test]
    fn test_key_string_accepts_numbers() {
        let slice = Slice::everywhere(json!({"Id": 42}));
        assert_eq!(slice.key("Id").as_deref(), Some("42"));
        assert_eq!(slice.key("Missing"), None);
    }
}
