//! Temporal expressions for `expires_at`.
//!
//! Templates accept either an absolute instant (`2024-06-01T00:00:00Z`,
//! `2024-06-01`) or a relative expression (`in 3 days`, `tomorrow`).
//! Relative expressions are kept verbatim until the merge step pins them to
//! an absolute instant; resolution refuses to evaluate them.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:in\s+)?(\d+)\s+(minute|minutes|min|mins|hour|hours|day|days|week|weeks)$")
        .expect("relative expression regex is valid")
});

/// Errors from parsing or normalizing a temporal expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemporalError {
    /// The text is neither an instant, a date, nor a known relative form.
    #[error("unrecognized time expression '{0}'")]
    Unrecognized(String),

    /// A relative expression was evaluated without first being pinned.
    #[error("relative expression '{0}' has not been normalized to an absolute instant")]
    Unnormalized(String),

    /// The relative offset does not fit in the calendar.
    #[error("time expression '{0}' is out of range")]
    OutOfRange(String),
}

/// An expiration instant as written in a template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemporalExpression {
    /// A pinned instant.
    Absolute(DateTime<Utc>),
    /// A relative expression such as `in 3 days`, stored verbatim.
    Relative(String),
}

impl TemporalExpression {
    /// Parse the textual form used in template files.
    pub fn parse(text: &str) -> Result<Self, TemporalError> {
        let trimmed = text.trim();

        if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::Absolute(instant.with_timezone(&Utc)));
        }

        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            let midnight = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| TemporalError::OutOfRange(trimmed.to_string()))?;
            return Ok(Self::Absolute(midnight.and_utc()));
        }

        relative_offset(trimmed)?;
        Ok(Self::Relative(trimmed.to_string()))
    }

    /// Pin this expression to an absolute instant, using `base` for relative forms.
    pub fn normalize(&self, base: DateTime<Utc>) -> Result<DateTime<Utc>, TemporalError> {
        match self {
            Self::Absolute(instant) => Ok(*instant),
            Self::Relative(text) => {
                let offset = relative_offset(text)?;
                base.checked_add_signed(offset)
                    .ok_or_else(|| TemporalError::OutOfRange(text.clone()))
            }
        }
    }

    /// The pinned instant, refusing relative expressions.
    pub fn absolute(&self) -> Result<DateTime<Utc>, TemporalError> {
        match self {
            Self::Absolute(instant) => Ok(*instant),
            Self::Relative(text) => Err(TemporalError::Unnormalized(text.clone())),
        }
    }

    /// Whether this is a relative expression.
    #[must_use]
    pub fn is_relative(&self) -> bool {
        matches!(self, Self::Relative(_))
    }
}

fn relative_offset(text: &str) -> Result<Duration, TemporalError> {
    let lowered = text.trim().to_ascii_lowercase();
    if lowered == "tomorrow" {
        return Ok(Duration::days(1));
    }

    let captures = RELATIVE_RE
        .captures(&lowered)
        .ok_or_else(|| TemporalError::Unrecognized(text.to_string()))?;

    let amount: i64 = captures[1]
        .parse()
        .map_err(|_| TemporalError::OutOfRange(text.to_string()))?;

    let offset = match &captures[2] {
        "minute" | "minutes" | "min" | "mins" => Duration::try_minutes(amount),
        "hour" | "hours" => Duration::try_hours(amount),
        "day" | "days" => Duration::try_days(amount),
        _ => Duration::try_weeks(amount),
    };

    offset.ok_or_else(|| TemporalError::OutOfRange(text.to_string()))
}

impl fmt::Display for TemporalExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absolute(instant) => write!(f, "{}", instant.to_rfc3339()),
            Self::Relative(text) => write!(f, "{text}"),
        }
    }
}

impl From<DateTime<Utc>> for TemporalExpression {
    fn from(instant: DateTime<Utc>) -> Self {
        Self::Absolute(instant)
    }
}

impl Serialize for TemporalExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TemporalExpression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
