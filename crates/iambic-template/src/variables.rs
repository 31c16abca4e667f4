//! Variable substitution.
//!
//! Tokens have the form `{{var.<name>}}`. Substitution is a single textual
//! pass: a substituted value that itself contains a token is left as is.
//! Unknown names fail closed.
//!
//! Lookup order for a name:
//! 1. `account_id` and `account_name`, taken from the account itself
//! 2. the account's own variables
//! 3. repository-wide variables
//!
//! The inverse, [`templatize`], rewrites an observed value so that the
//! account's own id and name become tokens. Grouping uses it so that
//! `prod_admin` on `prod` and `dev_admin` on `dev` cluster together.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use iambic_core::AccountContext;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*var\.([A-Za-z0-9_]+)\s*\}\}").expect("token regex is valid")
});

/// Token for the account id.
pub const ACCOUNT_ID_TOKEN: &str = "{{var.account_id}}";
/// Token for the account name.
pub const ACCOUNT_NAME_TOKEN: &str = "{{var.account_name}}";

/// Errors from variable substitution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VariableError {
    /// A token names a variable that is not defined for the account.
    #[error("unknown variable '{name}'")]
    UnknownVariable {
        /// Name inside the token
        name: String,
    },
}

/// Variables visible while resolving one account.
#[derive(Debug, Clone, Copy)]
pub struct VariableScope<'a> {
    account: &'a AccountContext,
    repository: &'a BTreeMap<String, String>,
}

impl<'a> VariableScope<'a> {
    /// Scope for an account within a repository.
    #[must_use]
    pub fn new(account: &'a AccountContext, repository: &'a BTreeMap<String, String>) -> Self {
        Self {
            account,
            repository,
        }
    }

    /// Resolve one variable name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Cow<'a, str>> {
        match name {
            "account_id" => Some(Cow::Borrowed(self.account.account_id.as_str())),
            "account_name" => Some(Cow::Borrowed(self.account.account_name.as_str())),
            _ => self
                .account
                .variables
                .get(name)
                .or_else(|| self.repository.get(name))
                .map(|v| Cow::Borrowed(v.as_str())),
        }
    }
}

/// Whether `text` contains at least one token.
#[must_use]
pub fn contains_tokens(text: &str) -> bool {
    TOKEN_RE.is_match(text)
}

/// Replace every token in `text`.
pub fn substitute(text: &str, scope: &VariableScope<'_>) -> Result<String, VariableError> {
    if !text.contains("{{") {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for captures in TOKEN_RE.captures_iter(text) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = scope
            .lookup(name.as_str())
            .ok_or_else(|| VariableError::UnknownVariable {
                name: name.as_str().to_string(),
            })?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Replace tokens in every string leaf and object key of `value`.
pub fn substitute_value(value: &Value, scope: &VariableScope<'_>) -> Result<Value, VariableError> {
    match value {
        Value::String(s) => Ok(Value::String(substitute(s, scope)?)),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute_value(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (key, field) in fields {
                out.insert(substitute(key, scope)?, substitute_value(field, scope)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Replace the account's id and name inside `text` with tokens.
///
/// Matches must sit on an alphanumeric boundary, so `prod` is rewritten in
/// `prod_admin` but not in `production`.
#[must_use]
pub fn templatize(text: &str, account: &AccountContext) -> String {
    let with_id = replace_bounded(text, account.account_id.as_str(), ACCOUNT_ID_TOKEN);
    replace_bounded(&with_id, &account.account_name, ACCOUNT_NAME_TOKEN)
}

/// [`templatize`] applied to every string leaf and object key of `value`.
#[must_use]
pub fn templatize_value(value: &Value, account: &AccountContext) -> Value {
    match value {
        Value::String(s) => Value::String(templatize(s, account)),
        Value::Array(items) => Value::Array(items.iter().map(|i| templatize_value(i, account)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (templatize(k, account), templatize_value(v, account)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn replace_bounded(text: &str, needle: &str, token: &str) -> String {
    if needle.is_empty() || !text.contains(needle) {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, _) in text.match_indices(needle) {
        if start < last {
            continue;
        }
        let end = start + needle.len();
        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_ascii_alphanumeric());
        let after_ok = text[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_alphanumeric());
        if before_ok && after_ok && !inside_token(text, start) {
            out.push_str(&text[last..start]);
            out.push_str(token);
            last = end;
        }
    }
    out.push_str(&text[last..]);
    out
}

/// Whether `offset` falls inside an existing `{{ ... }}` token.
fn inside_token(text: &str, offset: usize) -> bool {
    TOKEN_RE
        .find_iter(text)
        .any(|m| m.start() <= offset && offset < m.end())
}
