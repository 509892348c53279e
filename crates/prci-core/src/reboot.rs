//! Persisted reboot timestamp: `/root/next_reboot` holds an epoch-seconds
//! integer so a planned self-reboot survives process restarts
//! (spec.md §6, §9 "mutable global reboot timestamp").

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Window within which the next reboot is scheduled, relative to now: wide
/// enough that a fleet of runners restarted together don't all reboot in
/// the same instant (spec.md §9 "schedule a new random delay").
const REBOOT_WINDOW: std::ops::Range<i64> = 12 * 3600..36 * 3600;

/// Load the next reboot time. Tolerates absence or malformed contents by
/// returning `None`, leaving the caller to schedule a fresh one.
pub fn load_next_reboot(path: &Path) -> Option<DateTime<Utc>> {
    let contents = std::fs::read_to_string(path).ok()?;
    let epoch: i64 = contents.trim().parse().ok()?;
    DateTime::from_timestamp(epoch, 0)
}

/// Persist the next reboot time as an epoch-seconds integer.
pub fn save_next_reboot(path: &Path, at: DateTime<Utc>) -> std::io::Result<()> {
    std::fs::write(path, at.timestamp().to_string())
}

/// Whether the persisted reboot time has passed, given `now`.
pub fn is_due(path: &Path, now: DateTime<Utc>) -> bool {
    match load_next_reboot(path) {
        Some(at) => at <= now,
        None => false,
    }
}

/// Ensure a next-reboot time is persisted at `path`, returning it. If one
/// is already on disk it is left untouched; otherwise a fresh one is drawn
/// at a random delay within [`REBOOT_WINDOW`] of `now` and persisted.
pub fn ensure_scheduled(path: &Path, now: DateTime<Utc>) -> std::io::Result<DateTime<Utc>> {
    if let Some(at) = load_next_reboot(path) {
        return Ok(at);
    }
    let delay = rand::rng().random_range(REBOOT_WINDOW);
    let at = now + Duration::seconds(delay);
    save_next_reboot(path, at)?;
    Ok(at)
}
