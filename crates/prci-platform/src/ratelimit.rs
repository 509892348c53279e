//! Rate-limit backoff (spec.md §4.5), grounded in
//! `original_source/github/prci_github/adapter.py::GitHubAdapter.send`:
//! when remaining hits zero, sleep until the exact reset timestamp,
//! clamped to zero in case of clock skew.

use chrono::{DateTime, Utc};

/// A rate-limit snapshot parsed from response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// How long to sleep before the next call, given the current snapshot and
/// the configured ephemeral floor. `None` means proceed immediately.
pub fn backoff_for(snapshot: &RateLimitSnapshot, ephemeral_floor: u32, now: DateTime<Utc>) -> Option<std::time::Duration> {
    if snapshot.remaining == 0 || snapshot.remaining < ephemeral_floor {
        let delta = snapshot.reset_at - now;
        let secs = delta.num_seconds().max(0) as u64;
        Some(std::time::Duration::from_secs(secs))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn no_backoff_when_plenty_remaining() {
        let now = Utc::now();
        let snapshot = RateLimitSnapshot {
            remaining: 4000,
            reset_at: now + Duration::minutes(30),
        };
        assert_eq!(backoff_for(&snapshot, 60, now), None);
    }

    #[test]
    fn backoff_when_remaining_is_zero() {
        let now = Utc::now();
        let snapshot = RateLimitSnapshot {
            remaining: 0,
            reset_at: now + Duration::seconds(120),
        };
        let backoff = backoff_for(&snapshot, 60, now).unwrap();
        assert_eq!(backoff.as_secs(), 120);
    }

    #[test]
    fn backoff_when_below_ephemeral_floor() {
        let now = Utc::now();
        let snapshot = RateLimitSnapshot {
            remaining: 10,
            reset_at: now + Duration::seconds(30),
        };
        assert!(backoff_for(&snapshot, 60, now).is_some());
    }

    #[test]
    fn backoff_clamps_to_zero_when_reset_already_passed() {
        let now = Utc::now();
        let snapshot = RateLimitSnapshot {
            remaining: 0,
            reset_at: now - Duration::seconds(10),
        };
        let backoff = backoff_for(&snapshot, 60, now).unwrap();
        assert_eq!(backoff.as_secs(), 0);
    }
}
