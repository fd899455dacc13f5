//! Exponential backoff with jitter, and `Retry-After` parsing.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use rand::Rng;

/// Calculate the delay before retry number `attempt_index` (0 for the first retry).
///
/// `min(base * 2^attempt_index, max)`, then scaled by a uniform factor in
/// `[0.5, 1.5)` when `jitter` is set.
pub fn calculate_backoff(attempt_index: u32, base: Duration, max: Duration, jitter: bool) -> Duration {
    let factor = 2u32.checked_pow(attempt_index).unwrap_or(u32::MAX);
    let capped = base.checked_mul(factor).unwrap_or(max).min(max);

    if jitter {
        let scale = rand::thread_rng().gen_range(0.5..1.5);
        Duration::try_from_secs_f64(capped.as_secs_f64() * scale).unwrap_or(Duration::MAX)
    } else {
        capped
    }
}

/// Parse a `Retry-After` header value.
///
/// Accepts delta-seconds (`"120"`) or an HTTP-date in any of its three forms
/// (IMF-fixdate, RFC 850, asctime); a date in the past yields zero.
/// Returns `None` for anything else so the caller can fall back to computed backoff.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    parse_retry_after_at(value, Utc::now())
}

/// [`parse_retry_after`] against an explicit clock.
pub fn parse_retry_after_at(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(date) = parse_http_date(value) {
        let wait = date - now;
        return Some(wait.to_std().unwrap_or(Duration::ZERO));
    }

    if value.bytes().all(|b| b.is_ascii_digit()) {
        return value.parse::<u64>().ok().map(Duration::from_secs);
    }

    None
}

/// Obsolete HTTP-date layouts, always GMT.
const OBSOLETE_DATE_FORMATS: [&str; 2] = [
    // RFC 850: Sunday, 06-Nov-94 08:49:37 GMT
    "%A, %d-%b-%y %H:%M:%S GMT",
    // asctime: Sun Nov  6 08:49:37 1994
    "%a %b %e %H:%M:%S %Y",
];

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }
    OBSOLETE_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}
