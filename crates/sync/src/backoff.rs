//! Offline-peer backoff (§4.8): once a peer has accumulated a trailing run
//! of connectivity failures, dials back off exponentially instead of
//! retrying every scheduler tick.

use chrono::{DateTime, Utc};
use codemem_db::SyncAttempt;

const BACKOFF_FLOOR_SECS: i64 = 120;
const BACKOFF_CEILING_SECS: i64 = 1800;
const MIN_CONSECUTIVE_FAILURES: u32 = 2;

/// Substrings that mark a failure as connectivity-shaped (peer unreachable)
/// rather than an application-level rejection (auth, bad request). Only
/// these count toward the backoff run.
const CONNECTIVITY_PATTERNS: &[&str] = &[
    "connection refused",
    "no route to host",
    "host unreachable",
    "network unreachable",
    "timed out",
    "timeout",
    "dns error",
    "failed to lookup address",
    "could not resolve host",
    "connection reset",
    "broken pipe",
];

fn is_connectivity_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    CONNECTIVITY_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Count the trailing run of consecutive connectivity failures in
/// `attempts`, which must be ordered most-recent-first (as returned by
/// `Database::recent_sync_attempts`). The run stops at the first success or
/// the first non-connectivity failure.
fn trailing_connectivity_failures(attempts: &[SyncAttempt]) -> u32 {
    let mut count = 0;
    for attempt in attempts {
        if attempt.ok {
            break;
        }
        let matches = attempt.error.as_deref().is_some_and(is_connectivity_error);
        if !matches {
            break;
        }
        count += 1;
    }
    count
}

/// Seconds to wait before the next dial attempt is allowed, or `None` if the
/// peer should be dialed on this tick. `attempts` must be most-recent-first.
pub fn backoff_remaining(attempts: &[SyncAttempt], now: DateTime<Utc>) -> Option<i64> {
    let failures = trailing_connectivity_failures(attempts);
    if failures < MIN_CONSECUTIVE_FAILURES {
        return None;
    }

    let last = attempts.first()?;
    let last_started = DateTime::parse_from_rfc3339(&last.started_at).ok()?.with_timezone(&Utc);
    let wait_secs = backoff_duration_secs(failures);
    let elapsed = (now - last_started).num_seconds();
    let remaining = wait_secs - elapsed;
    if remaining > 0 {
        Some(remaining)
    } else {
        None
    }
}

fn backoff_duration_secs(consecutive_failures: u32) -> i64 {
    let exponent = consecutive_failures.saturating_sub(MIN_CONSECUTIVE_FAILURES);
    let scaled = BACKOFF_FLOOR_SECS.saturating_mul(1_i64.checked_shl(exponent).unwrap_or(i64::MAX));
    scaled.min(BACKOFF_CEILING_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(started_at: &str, ok: bool, error: Option<&str>) -> SyncAttempt {
        SyncAttempt {
            id: 0,
            peer_device_id: "peer".to_string(),
            started_at: started_at.to_string(),
            ok,
            error: error.map(str::to_string),
            ops_in: 0,
            ops_out: 0,
        }
    }

    #[test]
    fn no_backoff_with_fewer_than_two_failures() {
        let attempts = vec![attempt("2026-07-28T00:00:00Z", false, Some("connection refused"))];
        let now = DateTime::parse_from_rfc3339("2026-07-28T00:00:01Z").unwrap().with_timezone(&Utc);
        assert_eq!(backoff_remaining(&attempts, now), None);
    }

    #[test]
    fn non_connectivity_errors_never_trigger_backoff() {
        let attempts = vec![
            attempt("2026-07-28T00:01:00Z", false, Some("signature does not verify")),
            attempt("2026-07-28T00:00:00Z", false, Some("signature does not verify")),
        ];
        let now = DateTime::parse_from_rfc3339("2026-07-28T00:01:01Z").unwrap().with_timezone(&Utc);
        assert_eq!(backoff_remaining(&attempts, now), None);
    }

    #[test]
    fn two_consecutive_connectivity_failures_back_off_two_minutes() {
        let attempts = vec![
            attempt("2026-07-28T00:01:00Z", false, Some("Connection refused")),
            attempt("2026-07-28T00:00:00Z", false, Some("timed out")),
        ];
        let now = DateTime::parse_from_rfc3339("2026-07-28T00:01:30Z").unwrap().with_timezone(&Utc);
        assert_eq!(backoff_remaining(&attempts, now), Some(90));
    }

    #[test]
    fn backoff_caps_at_thirty_minutes() {
        let attempts: Vec<_> = (0..8)
            .map(|_| attempt("2026-07-28T00:00:00Z", false, Some("no route to host")))
            .collect();
        let now = DateTime::parse_from_rfc3339("2026-07-28T00:00:01Z").unwrap().with_timezone(&Utc);
        assert_eq!(backoff_remaining(&attempts, now), Some(BACKOFF_CEILING_SECS - 1));
    }

    #[test]
    fn a_success_stops_the_run() {
        let attempts = vec![
            attempt("2026-07-28T00:02:00Z", true, None),
            attempt("2026-07-28T00:01:00Z", false, Some("connection refused")),
            attempt("2026-07-28T00:00:00Z", false, Some("connection refused")),
        ];
        let now = DateTime::parse_from_rfc3339("2026-07-28T00:02:01Z").unwrap().with_timezone(&Utc);
        assert_eq!(backoff_remaining(&attempts, now), None);
    }

    #[test]
    fn backoff_expires_after_the_wait_elapses() {
        let attempts = vec![
            attempt("2026-07-28T00:01:00Z", false, Some("connection refused")),
            attempt("2026-07-28T00:00:00Z", false, Some("connection refused")),
        ];
        let now = DateTime::parse_from_rfc3339("2026-07-28T00:05:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(backoff_remaining(&attempts, now), None);
    }
}
