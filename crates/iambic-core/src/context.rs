//! Account context
//!
//! An [`AccountContext`] is one concrete target a template may be resolved
//! against. It carries the account's identity plus the variables that are
//! substituted into template values for that account.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::{AccountId, OrgId};

/// One cloud account a template can apply to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountContext {
    /// Provider-issued account identifier.
    pub account_id: AccountId,
    /// Human-readable account name, unique within a repository.
    pub account_name: String,
    /// Organization the account belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<OrgId>,
    /// Account-scoped variables, consulted before repository variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

impl AccountContext {
    /// Create a context with no organization and no variables.
    pub fn new(account_id: impl Into<AccountId>, account_name: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            account_name: account_name.into(),
            org_id: None,
            variables: BTreeMap::new(),
        }
    }

    /// Set the organization.
    #[must_use]
    pub fn with_org(mut self, org_id: impl Into<OrgId>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    /// Add an account-scoped variable.
    #[must_use]
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Whether `candidate` names this account, by id or by name, ignoring case.
    #[must_use]
    pub fn is_named(&self, candidate: &str) -> bool {
        candidate.eq_ignore_ascii_case(self.account_id.as_str())
            || candidate.eq_ignore_ascii_case(&self.account_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let ctx = AccountContext::new("111111111111", "prod")
            .with_org("o-main")
            .with_variable("team", "platform");

        assert_eq!(ctx.account_id.as_str(), "111111111111");
        assert_eq!(ctx.org_id, Some(OrgId::from("o-main")));
        assert_eq!(ctx.variables.get("team").map(String::as_str), Some("platform"));
    }

    #[test]
    fn test_is_named_matches_id_or_name() {
        let ctx = AccountContext::new("111111111111", "Prod");
        assert!(ctx.is_named("prod"));
        assert!(ctx.is_named("111111111111"));
        assert!(!ctx.is_named("staging"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let ctx: AccountContext =
            serde_json::from_str(r#"{"account_id":"1","account_name":"dev"}"#).unwrap();
        assert!(ctx.org_id.is_none());
        assert!(ctx.variables.is_empty());
    }
}
