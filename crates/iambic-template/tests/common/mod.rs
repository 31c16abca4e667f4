//! Shared fixtures for iambic-template integration tests.

#![allow(dead_code)]

use std::sync::Once;

use iambic_core::AccountContext;
use iambic_template::RepositoryContext;

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

/// Three accounts across two orgs.
pub fn accounts() -> Vec<AccountContext> {
    vec![
        AccountContext::new("111111111111", "prod")
            .with_org("o-main")
            .with_variable("env", "production"),
        AccountContext::new("222222222222", "staging")
            .with_org("o-main")
            .with_variable("env", "staging"),
        AccountContext::new("333333333333", "sandbox"),
    ]
}

/// Repository over [`accounts`] with one shared variable.
pub fn repository() -> RepositoryContext {
    RepositoryContext::new(accounts()).with_variable("domain", "example.com")
}
