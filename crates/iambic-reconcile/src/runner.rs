//! Bounded-concurrency plan runner.
//!
//! Every (template, account) pair is a unit of work on its own tokio task.
//! Units of one template type share a semaphore sized by the schema's
//! `max_concurrency` hint. Per-template and per-pair failures are collected
//! into the [`RunReport`]; cancellation and invariant violations abort the
//! run and discard partial results.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iambic_core::{AccountContext, IambicError, Result};
use iambic_template::{validation, RepositoryContext, Template};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ReconcileConfig;
use crate::plan::{plan_account, AccountPlan};
use crate::report::{FailureRecord, RunReport};

/// Source of live provider state.
///
/// Implementations own retries and rate limiting.
#[async_trait]
pub trait LiveStateProvider: Send + Sync {
    /// Current attributes of `template`'s resource on `account`, or `None`
    /// when it does not exist there.
    async fn fetch(
        &self,
        template: &Template,
        account: &AccountContext,
    ) -> Result<Option<Map<String, Value>>>;
}

/// Why a run produced no report.
#[derive(Debug, Error)]
pub enum RunError {
    /// The cancellation token fired before every unit finished.
    #[error("Run cancelled")]
    Cancelled,

    /// An invariant violation stopped the whole run.
    #[error("Run aborted: {0}")]
    Invariant(IambicError),

    /// A planning task panicked or was aborted.
    #[error("Plan task failed: {0}")]
    TaskFailed(String),
}

enum UnitOutcome {
    Planned(AccountPlan),
    Failed(FailureRecord),
    Cancelled,
}

/// Plans templates across every repository account.
pub struct PlanRunner {
    repo: Arc<RepositoryContext>,
    config: ReconcileConfig,
    provider: Arc<dyn LiveStateProvider>,
    cancel: CancellationToken,
}

impl PlanRunner {
    /// Create a runner.
    pub fn new(
        repo: Arc<RepositoryContext>,
        config: ReconcileConfig,
        provider: Arc<dyn LiveStateProvider>,
    ) -> Self {
        Self {
            repo,
            config,
            provider,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels the run; units not yet started are skipped.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn semaphore_for(&self, semaphores: &mut HashMap<String, Arc<Semaphore>>, template_type: &str) -> Arc<Semaphore> {
        semaphores
            .entry(template_type.to_string())
            .or_insert_with(|| {
                let limit = self
                    .repo
                    .schemas
                    .max_concurrency(template_type, self.config.default_max_concurrency);
                debug!(template_type, limit, "Created concurrency gate");
                Arc::new(Semaphore::new(limit))
            })
            .clone()
    }

    /// Plan every template on every account.
    #[instrument(skip_all, fields(templates = templates.len(), accounts = self.repo.accounts.len()))]
    pub async fn run(
        &self,
        templates: Vec<Template>,
        now: DateTime<Utc>,
    ) -> std::result::Result<RunReport, RunError> {
        self.repo.check().map_err(RunError::Invariant)?;
        info!("Starting plan run");

        let mut report = RunReport::new();
        let mut semaphores = HashMap::new();
        let mut join_set = JoinSet::new();

        for template in templates {
            let template = match validation::prepare(template.clone(), &self.repo.schemas) {
                Ok(prepared) => Arc::new(prepared),
                Err(err) if err.is_invariant() => return Err(RunError::Invariant(err)),
                Err(err) => {
                    warn!(template = %template.identifier, error = %err, "Template failed validation");
                    report.record_failure(FailureRecord::template(
                        template.template_type.clone(),
                        template.identifier.clone(),
                        err,
                    ));
                    continue;
                }
            };
            report.statistics.templates_processed += 1;

            let semaphore = self.semaphore_for(&mut semaphores, &template.template_type);
            for index in 0..self.repo.accounts.len() {
                let template = Arc::clone(&template);
                let semaphore = Arc::clone(&semaphore);
                let repo = Arc::clone(&self.repo);
                let provider = Arc::clone(&self.provider);
                let cancel = self.cancel.clone();

                join_set.spawn(async move {
                    run_unit(&template, &repo.accounts[index], &repo, provider.as_ref(), &semaphore, &cancel, now)
                        .await
                });
            }
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(UnitOutcome::Planned(plan)) => report.record_success(plan),
                Ok(UnitOutcome::Failed(failure)) if failure.error.is_invariant() => {
                    error!(error = %failure.error, "Invariant violated, aborting run");
                    join_set.abort_all();
                    return Err(RunError::Invariant(failure.error));
                }
                Ok(UnitOutcome::Failed(failure)) => {
                    warn!(
                        template = %failure.identifier,
                        account = failure.account.as_deref().unwrap_or_default(),
                        error = %failure.error,
                        "Plan failed for account"
                    );
                    report.record_failure(failure);
                }
                Ok(UnitOutcome::Cancelled) => {
                    join_set.abort_all();
                    info!("Plan run cancelled");
                    return Err(RunError::Cancelled);
                }
                Err(e) => {
                    error!(error = %e, "Plan task panicked");
                    join_set.abort_all();
                    return Err(RunError::TaskFailed(e.to_string()));
                }
            }
        }

        if self.cancel.is_cancelled() {
            info!("Plan run cancelled");
            return Err(RunError::Cancelled);
        }

        report.plans.sort_by(|a, b| {
            (&a.template_type, &a.identifier, &a.account_name)
                .cmp(&(&b.template_type, &b.identifier, &b.account_name))
        });
        report.failures.sort_by(|a, b| {
            (&a.template_type, &a.identifier, &a.account)
                .cmp(&(&b.template_type, &b.identifier, &b.account))
        });

        info!(summary = %report.summary(), "Plan run finished");
        Ok(report)
    }
}

async fn run_unit(
    template: &Template,
    account: &AccountContext,
    repo: &RepositoryContext,
    provider: &dyn LiveStateProvider,
    semaphore: &Semaphore,
    cancel: &CancellationToken,
    now: DateTime<Utc>,
) -> UnitOutcome {
    let _permit = tokio::select! {
        () = cancel.cancelled() => return UnitOutcome::Cancelled,
        permit = semaphore.acquire() => match permit {
            Ok(permit) => permit,
            Err(_) => return UnitOutcome::Cancelled,
        },
    };
    if cancel.is_cancelled() {
        return UnitOutcome::Cancelled;
    }

    let fetched = tokio::select! {
        () = cancel.cancelled() => return UnitOutcome::Cancelled,
        fetched = provider.fetch(template, account) => fetched,
    };

    let planned = fetched.and_then(|live| plan_account(template, account, repo, live.as_ref(), now));
    match planned {
        Ok(plan) => UnitOutcome::Planned(plan),
        Err(err) => UnitOutcome::Failed(
            FailureRecord::template(template.template_type.clone(), template.identifier.clone(), err)
                .on_account(account.account_name.clone()),
        ),
    }
}
