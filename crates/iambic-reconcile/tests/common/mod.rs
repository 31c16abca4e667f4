//! Shared fixtures for iambic-reconcile integration tests.

#![allow(dead_code)]

use std::sync::Once;

use iambic_core::AccountContext;
use iambic_reconcile::ObservedResource;
use iambic_template::RepositoryContext;
use serde_json::{Map, Value};

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

/// Three accounts in one org.
pub fn accounts() -> Vec<AccountContext> {
    vec![
        AccountContext::new("111111111111", "prod")
            .with_org("o-main")
            .with_variable("env", "production"),
        AccountContext::new("222222222222", "staging")
            .with_org("o-main")
            .with_variable("env", "staging"),
        AccountContext::new("333333333333", "sandbox")
            .with_org("o-main")
            .with_variable("env", "sandbox"),
    ]
}

/// Repository over [`accounts`].
pub fn repository() -> RepositoryContext {
    RepositoryContext::new(accounts())
}

/// Repository over `n` generated accounts named `acct-00`, `acct-01`, ...
pub fn repository_of(n: usize) -> RepositoryContext {
    RepositoryContext::new(
        (0..n)
            .map(|i| AccountContext::new(format!("{:012}", 100_000 + i), format!("acct-{i:02}")).with_org("o-main"))
            .collect(),
    )
}

/// Unwrap a `json!` object literal.
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

/// Observation of `attributes` on the account named `account_name`.
pub fn observed_on(repo: &RepositoryContext, account_name: &str, attributes: Value) -> ObservedResource {
    let account = repo
        .accounts
        .iter()
        .find(|a| a.account_name == account_name)
        .unwrap_or_else(|| panic!("no account named {account_name}"));
    ObservedResource::new(account.account_id.clone(), object(attributes))
}
