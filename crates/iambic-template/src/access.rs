//! Account and organization scoping for templates and slices.
//!
//! An [`AccessModel`] is a set-difference predicate over accounts (and,
//! independently, organizations) plus lifecycle flags. A slice applies to an
//! account iff the account matches some included pattern, matches no
//! excluded pattern, passes the same check at org level, has not expired,
//! and is not tombstoned.
//!
//! Patterns are matched case-insensitively against the account id and the
//! account name:
//!
//! - `*` matches every account (a wildcard match)
//! - a pattern containing `*` is an anchored regular expression, with a bare
//!   `*` read as `.*` (a wildcard match)
//! - anything else matches an account by exact id or name, even when it
//!   holds characters such as `.` or `(` (an explicit match)

use std::collections::{BTreeSet, HashMap};
use std::sync::{LazyLock, RwLock};

use chrono::{DateTime, Utc};
use iambic_core::AccountContext;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::temporal::{TemporalError, TemporalExpression};

/// The wildcard pattern.
pub const WILDCARD: &str = "*";

/// Compiled pattern regexes keyed by their source.
static PATTERN_CACHE: LazyLock<RwLock<HashMap<String, Regex>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

fn compile_cached(source: &str) -> Result<Regex, regex::Error> {
    if let Ok(cache) = PATTERN_CACHE.read() {
        if let Some(re) = cache.get(source) {
            return Ok(re.clone());
        }
    }
    let re = RegexBuilder::new(source).case_insensitive(true).build()?;
    if let Ok(mut cache) = PATTERN_CACHE.write() {
        cache.insert(source.to_string(), re.clone());
    }
    Ok(re)
}

/// An account or org pattern that failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid account pattern '{pattern}': {message}")]
pub struct PatternError {
    /// Pattern as written in the template
    pub pattern: String,
    /// Regex compiler message
    pub message: String,
}

/// How an account matched an include list.
///
/// Ordered so that a stronger match compares greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchStrength {
    /// Matched through `*` or a regular expression.
    Wildcard,
    /// Matched by exact account id or name.
    Explicit,
}

/// One compiled include/exclude entry.
#[derive(Debug, Clone)]
pub enum AccountPattern {
    /// `*`
    Any,
    /// Exact id or name, case-insensitive.
    Literal(String),
    /// Anchored, case-insensitive regular expression (written with `*`).
    Regex(Regex),
}

impl AccountPattern {
    /// Compile a pattern as written in a template.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let trimmed = pattern.trim();
        if trimmed == WILDCARD {
            return Ok(Self::Any);
        }
        if !trimmed.contains('*') {
            return Ok(Self::Literal(trimmed.to_string()));
        }

        let source = format!("^(?:{})$", glob_star_to_regex(trimmed));
        compile_cached(&source)
            .map(Self::Regex)
            .map_err(|e| PatternError {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }

    /// Match against any of the given names (id, display name).
    #[must_use]
    pub fn matches(&self, candidates: &[&str]) -> Option<MatchStrength> {
        match self {
            Self::Any => Some(MatchStrength::Wildcard),
            Self::Literal(literal) => candidates
                .iter()
                .any(|c| c.eq_ignore_ascii_case(literal))
                .then_some(MatchStrength::Explicit),
            Self::Regex(re) => candidates
                .iter()
                .any(|c| re.is_match(c))
                .then_some(MatchStrength::Wildcard),
        }
    }
}

/// Rewrite a bare `*` (one not already following `.`) as `.*`.
fn glob_star_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut prev: Option<char> = None;
    for ch in pattern.chars() {
        if ch == '*' && !matches!(prev, Some('.') | Some('\\') | Some(')') | Some(']')) {
            out.push_str(".*");
        } else {
            out.push(ch);
        }
        prev = Some(ch);
    }
    out
}

fn wildcard_list() -> Vec<String> {
    vec![WILDCARD.to_string()]
}

fn is_wildcard_list(list: &[String]) -> bool {
    list.len() == 1 && list[0] == WILDCARD
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Account/org scoping plus lifecycle flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessModel {
    /// Accounts the slice applies to.
    #[serde(default = "wildcard_list", skip_serializing_if = "is_wildcard_list")]
    pub included_accounts: Vec<String>,
    /// Accounts carved out of `included_accounts`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_accounts: Vec<String>,
    /// Organizations the slice applies to.
    #[serde(default = "wildcard_list", skip_serializing_if = "is_wildcard_list")]
    pub included_orgs: Vec<String>,
    /// Organizations carved out of `included_orgs`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_orgs: Vec<String>,
    /// When the slice stops applying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<TemporalExpression>,
    /// Tombstone: dropped on next apply, never re-created by import.
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

impl Default for AccessModel {
    fn default() -> Self {
        Self {
            included_accounts: wildcard_list(),
            excluded_accounts: Vec::new(),
            included_orgs: wildcard_list(),
            excluded_orgs: Vec::new(),
            expires_at: None,
            deleted: false,
        }
    }
}

impl AccessModel {
    /// Scope applying to every account.
    #[must_use]
    pub fn everywhere() -> Self {
        Self::default()
    }

    /// Scope listing accounts explicitly.
    pub fn including<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            included_accounts: accounts.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Scope applying everywhere except the listed accounts.
    pub fn excluding<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded_accounts: accounts.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set an expiration.
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: TemporalExpression) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Mark as tombstoned.
    #[must_use]
    pub fn tombstoned(mut self) -> Self {
        self.deleted = true;
        self
    }

    /// Whether the account predicate is the unrestricted `*`.
    #[must_use]
    pub fn is_unscoped(&self) -> bool {
        is_wildcard_list(&self.included_accounts)
            && self.excluded_accounts.is_empty()
            && is_wildcard_list(&self.included_orgs)
            && self.excluded_orgs.is_empty()
    }

    /// Whether this slice carries nothing beyond the default scope.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.is_unscoped() && self.expires_at.is_none() && !self.deleted
    }

    /// Copy the account and org predicate of `other`, keeping lifecycle flags.
    pub fn set_scope_from(&mut self, other: &AccessModel) {
        self.included_accounts = other.included_accounts.clone();
        self.excluded_accounts = other.excluded_accounts.clone();
        self.included_orgs = other.included_orgs.clone();
        self.excluded_orgs = other.excluded_orgs.clone();
    }

    /// Number of identifiers the account predicate lists.
    #[must_use]
    pub fn listed_identifiers(&self) -> usize {
        let included = if is_wildcard_list(&self.included_accounts) {
            0
        } else {
            self.included_accounts.len()
        };
        included + self.excluded_accounts.len()
    }

    /// Evaluate the account and org predicate, ignoring expiry and tombstone.
    ///
    /// Returns the strength of the strongest include match, or `None` when
    /// the account is outside the predicate.
    pub fn match_account(
        &self,
        account: &AccountContext,
    ) -> Result<Option<MatchStrength>, PatternError> {
        Ok(self.compile()?.match_account(account))
    }

    /// Compile every pattern once, for matching many accounts.
    pub fn compile(&self) -> Result<CompiledAccess, PatternError> {
        let parse_all = |list: &[String]| {
            list.iter()
                .map(|p| AccountPattern::parse(p))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(CompiledAccess {
            included_accounts: parse_all(&self.included_accounts)?,
            excluded_accounts: parse_all(&self.excluded_accounts)?,
            included_orgs: parse_all(&self.included_orgs)?,
            excluded_orgs: parse_all(&self.excluded_orgs)?,
        })
    }

    /// Whether the slice is neither tombstoned nor expired at `now`.
    ///
    /// An `expires_at` equal to `now` is still live. Relative expressions are
    /// refused: they must be normalized before evaluation.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> Result<bool, TemporalError> {
        if self.deleted {
            return Ok(false);
        }
        match &self.expires_at {
            None => Ok(true),
            Some(expr) => Ok(expr.absolute()? >= now),
        }
    }

    /// Whether the slice has an absolute expiration strictly before `now`.
    #[must_use]
    pub fn has_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(&self.expires_at, Some(TemporalExpression::Absolute(t)) if *t < now)
    }

    /// Accounts out of `universe` this predicate covers.
    pub fn covered_accounts<'a>(
        &self,
        universe: &'a [AccountContext],
    ) -> Result<BTreeSet<&'a str>, PatternError> {
        let compiled = self.compile()?;
        let mut covered = BTreeSet::new();
        for account in universe {
            if compiled.match_account(account).is_some() {
                covered.insert(account.account_id.as_str());
            }
        }
        Ok(covered)
    }
}

/// The account and org predicate of an [`AccessModel`] with its patterns
/// compiled.
#[derive(Debug, Clone)]
pub struct CompiledAccess {
    included_accounts: Vec<AccountPattern>,
    excluded_accounts: Vec<AccountPattern>,
    included_orgs: Vec<AccountPattern>,
    excluded_orgs: Vec<AccountPattern>,
}

impl CompiledAccess {
    /// See [`AccessModel::match_account`].
    #[must_use]
    pub fn match_account(&self, account: &AccountContext) -> Option<MatchStrength> {
        let names = [account.account_id.as_str(), account.account_name.as_str()];

        let strength = self
            .included_accounts
            .iter()
            .filter_map(|p| p.matches(&names))
            .max()?;
        if self.excluded_accounts.iter().any(|p| p.matches(&names).is_some()) {
            return None;
        }
        self.org_matches(account).then_some(strength)
    }

    fn org_matches(&self, account: &AccountContext) -> bool {
        let Some(org) = account.org_id.as_ref() else {
            return self
                .included_orgs
                .iter()
                .any(|p| matches!(p, AccountPattern::Any));
        };
        let names = [org.as_str()];

        self.included_orgs.iter().any(|p| p.matches(&names).is_some())
            && !self.excluded_orgs.iter().any(|p| p.matches(&names).is_some())
    }
}
