//! Lease encoding: the `Taken by <runner_id> on <UTC timestamp>` format that
//! carries task ownership inside a status description.
//!
//! There is no separate lease store; the lease lives entirely inside the
//! text of a [`crate::model::Status`] description, so this module's parser
//! must round-trip exactly what its formatter writes.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};

/// Platform-imposed limit on a status description, in bytes.
pub const DESCRIPTION_LIMIT: usize = 139;

const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M UTC";

/// Error returned when a status description does not parse as a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseParseError(pub String);

impl fmt::Display for LeaseParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a lease description: {:?}", self.0)
    }
}

impl std::error::Error for LeaseParseError {}

/// An ownership record for a task, encoded into a status description.
///
/// Minute precision only: the wire format has no seconds field, so two
/// claims within the same minute are indistinguishable by timestamp alone
/// (the claim protocol's tie-break is the last-write-wins read-back, not
/// the timestamp).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub runner_id: String,
    pub claimed_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(runner_id: impl Into<String>, claimed_at: DateTime<Utc>) -> Self {
        Lease {
            runner_id: runner_id.into(),
            claimed_at: claimed_at.trunc_subsecs(0),
        }
    }

    /// Format as `Taken by <runner_id> on <UTC timestamp>`.
    pub fn encode(&self) -> String {
        format!(
            "Taken by {} on {}",
            self.runner_id,
            self.claimed_at.format(TIMESTAMP_FMT)
        )
    }

    /// Parse a status description as a lease. Returns `Err` for anything
    /// that doesn't match the exact `Taken by <runner_id> on <timestamp>`
    /// shape, including `unassigned` and `pending for rerun`.
    pub fn parse(description: &str) -> Result<Self, LeaseParseError> {
        let rest = description
            .strip_prefix("Taken by ")
            .ok_or_else(|| LeaseParseError(description.to_string()))?;
        let (runner_id, timestamp) = rest
            .split_once(" on ")
            .ok_or_else(|| LeaseParseError(description.to_string()))?;
        if runner_id.is_empty() || runner_id.contains(' ') {
            return Err(LeaseParseError(description.to_string()));
        }
        let naive = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FMT)
            .map_err(|_| LeaseParseError(description.to_string()))?;
        let claimed_at = Utc.from_utc_datetime(&naive);
        Ok(Lease {
            runner_id: runner_id.to_string(),
            claimed_at,
        })
    }

    /// Whether this lease is stale given a job timeout and a grace period.
    pub fn is_stale(&self, timeout: chrono::Duration, grace: chrono::Duration, now: DateTime<Utc>) -> bool {
        !(self.claimed_at + timeout + grace > now)
    }
}

/// Truncate a description to [`DESCRIPTION_LIMIT`] bytes, splitting on a
/// char boundary. Idempotent: truncating an already-truncated string is a
/// no-op.
pub fn truncate_description(description: &str) -> String {
    if description.len() <= DESCRIPTION_LIMIT {
        return description.to_string();
    }
    let mut end = DESCRIPTION_LIMIT;
    while !description.is_char_boundary(end) {
        end -= 1;
    }
    description[..end].to_string()
}
