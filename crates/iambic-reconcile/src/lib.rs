//! iambic Reconciliation Engines
//!
//! Reconciles multi-account identity templates against observed provider
//! state:
//!
//! - [`grouping`] - collapse per-account observations into one template
//! - [`merge`] - fold fresh observations into a committed template while
//!   keeping IAMbic-only metadata
//! - [`resolution`] - expand a template into one account's attributes
//! - [`import`] - import rules plus grouping and merge for one resource
//! - [`plan`] - per-account diff against live state
//! - [`runner`] - async plan run with per-type concurrency limits
//! - [`report`] - partial-failure run report
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use iambic_core::AccountContext;
//! use iambic_reconcile::{group, resolve, ObservedResource, ReconcileConfig};
//! use iambic_template::RepositoryContext;
//! use serde_json::json;
//!
//! let repo = RepositoryContext::new(vec![
//!     AccountContext::new("111111111111", "prod"),
//!     AccountContext::new("222222222222", "staging"),
//! ]);
//! let observed: Vec<ObservedResource> = repo
//!     .accounts
//!     .iter()
//!     .map(|a| {
//!         let attributes = json!({"RoleName": "admin"}).as_object().cloned().unwrap_or_default();
//!         ObservedResource::new(a.account_id.clone(), attributes)
//!     })
//!     .collect();
//!
//! let template = group("NOQ::AWS::IAM::Role", "admin", &observed, &repo, &ReconcileConfig::default()).unwrap();
//! let resolution = resolve(&template, &repo.accounts[0], &repo, Utc::now()).unwrap();
//! assert!(resolution.is_applicable());
//! ```

pub mod config;
pub mod grouping;
pub mod import;
pub mod merge;
pub mod plan;
pub mod report;
pub mod resolution;
pub mod runner;
mod scope;

pub use config::ReconcileConfig;
pub use grouping::{group, ObservedResource};
pub use import::{import, ImportAction, ImportOutcome, ImportRule, ImportRules, SkipReason, TagMatch};
pub use merge::{merge, MergeContext};
pub use plan::{diff, plan_account, AccountPlan, ChangeType, ProposedChange};
pub use report::{FailureRecord, RunReport, RunStatistics};
pub use resolution::{materialize, resolve, NotApplicableReason, Resolution, ResolvedAttributeSet};
pub use runner::{LiveStateProvider, PlanRunner, RunError};
