//! Failure classification and retry scheduling.
//!
//! Handlers report failures as plain error strings; classification decides
//! from the message alone whether a retry can possibly help. Paywall and
//! invalid-input failures are spotted before transient ones because their
//! messages often also contain transient-looking words ("rate limit",
//! "request failed").

use chrono::{DateTime, Duration, Utc};

use palimpsest_core::defaults::RETRY_BACKOFF_CAP_MINUTES;
use palimpsest_core::{FailureClass, FailureKind};

const PAYWALL_PATTERNS: &[&str] = &[
    "quota",
    "billing",
    "payment required",
    "insufficient credit",
    "credit balance",
    "rate limit exceeded",
];

const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "temporarily unavailable",
    "service unavailable",
    "too many requests",
    "429",
    "500",
    "502",
    "503",
    "504",
];

const INVALID_PATTERNS: &[&str] = &[
    "not found",
    "404",
    "invalid",
    "malformed",
    "parse error",
    "unsupported",
];

/// Classify a failure from its error message.
pub fn classify_error(message: &str) -> FailureClass {
    let lower = message.to_lowercase();

    let kind = if PAYWALL_PATTERNS.iter().any(|p| lower.contains(p)) {
        FailureKind::Paywall
    } else if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        FailureKind::Transient
    } else if INVALID_PATTERNS.iter().any(|p| lower.contains(p)) {
        FailureKind::Invalid
    } else {
        FailureKind::Permanent
    };

    FailureClass {
        kind,
        can_retry: kind == FailureKind::Transient,
    }
}

/// Exponential backoff in minutes for the given retry count, capped.
/// Produces 1, 2, 4, 8, 16, 30, 30, ...
pub fn backoff_minutes(retry_count: i32) -> i64 {
    let exp = retry_count.clamp(0, 30) as u32;
    (1i64 << exp).min(RETRY_BACKOFF_CAP_MINUTES)
}

/// Earliest time a job failing now for the `retry_count`-th time may be
/// re-queued.
pub fn next_retry_at(retry_count: i32) -> DateTime<Utc> {
    Utc::now() + Duration::minutes(backoff_minutes(retry_count))
}
