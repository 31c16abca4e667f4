//! Repository-wide context passed into every engine call.

use std::collections::{BTreeMap, BTreeSet};

use iambic_core::{AccountContext, IambicError, Result};

use crate::schema::SchemaRegistry;
use crate::variables::VariableScope;

/// Everything an engine needs to know about the repository.
///
/// Engines receive this by reference; nothing in it is mutated during a run,
/// so one value can be shared by concurrent resolutions.
#[derive(Debug, Clone)]
pub struct RepositoryContext {
    /// Every account known to the repository.
    pub accounts: Vec<AccountContext>,
    /// Repository-wide variables.
    pub variables: BTreeMap<String, String>,
    /// Known template types.
    pub schemas: SchemaRegistry,
}

impl RepositoryContext {
    /// Context over `accounts` with the built-in schemas and no variables.
    #[must_use]
    pub fn new(accounts: Vec<AccountContext>) -> Self {
        Self {
            accounts,
            variables: BTreeMap::new(),
            schemas: SchemaRegistry::builtin(),
        }
    }

    /// Add a repository-wide variable.
    #[must_use]
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Replace the schema registry.
    #[must_use]
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    /// Find an account by exact id.
    #[must_use]
    pub fn account(&self, account_id: &str) -> Option<&AccountContext> {
        self.accounts
            .iter()
            .find(|a| a.account_id.as_str() == account_id)
    }

    /// Variable scope for one account.
    #[must_use]
    pub fn scope<'a>(&'a self, account: &'a AccountContext) -> VariableScope<'a> {
        VariableScope::new(account, &self.variables)
    }

    /// Reject duplicate account ids or names.
    pub fn check(&self) -> Result<()> {
        let mut ids = BTreeSet::new();
        let mut names = BTreeSet::new();
        for account in &self.accounts {
            if !ids.insert(account.account_id.as_str()) {
                return Err(IambicError::invariant(format!(
                    "account id '{}' is listed twice",
                    account.account_id
                )));
            }
            if !names.insert(account.account_name.to_ascii_lowercase()) {
                return Err(IambicError::invariant(format!(
                    "account name '{}' is listed twice",
                    account.account_name
                )));
            }
        }
        Ok(())
    }
}
