use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Milliseconds between the Unix epoch and the first second of 2015.
const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// Parses `Retry-After`, which Discord sends as fractional seconds, rounding up.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let seconds = headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)?;
    Some(seconds.ceil() as u64)
}

pub(crate) fn retry_delay(
    base_delay_ms: u64,
    attempt: usize,
    retry_after_seconds: Option<u64>,
) -> Duration {
    if let Some(retry_after_seconds) = retry_after_seconds {
        return Duration::from_secs(retry_after_seconds);
    }
    let exponent = attempt.saturating_sub(1).min(6) as u32;
    let scale = 2_u64.pow(exponent);
    Duration::from_millis(base_delay_ms.max(1).saturating_mul(scale))
}

pub(crate) fn is_retryable_discord_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

pub(crate) fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

pub(crate) fn truncate_for_error(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated = truncate_chars(value, max_chars);
    truncated.push_str("...");
    truncated
}

/// First `max_chars` characters of `value`.
pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Orders snowflake ids numerically; unparsable ids sort first.
pub(crate) fn compare_snowflakes(left: &str, right: &str) -> Ordering {
    let left_value = left.parse::<u64>().ok();
    let right_value = right.parse::<u64>().ok();
    left_value
        .cmp(&right_value)
        .then_with(|| left.cmp(right))
}

/// Creation time encoded in a snowflake id.
pub(crate) fn snowflake_timestamp(id: &str) -> Option<DateTime<Utc>> {
    let value = id.trim().parse::<u64>().ok()?;
    let unix_ms = (value >> 22).saturating_add(DISCORD_EPOCH_MS);
    DateTime::<Utc>::from_timestamp_millis(i64::try_from(unix_ms).ok()?)
}
