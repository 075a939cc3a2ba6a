use std::time::Duration;

use reqwest::StatusCode;

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Calculate the backoff duration using exponential backoff.
///
/// `attempt` is 1-based: the first retry waits `base`, the next `2 * base`,
/// and so on, capped at 60 seconds.
pub fn calculate_backoff(attempt: usize, base: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16) as u32;
    let delay = base.saturating_mul(1u32 << exponent);
    std::cmp::min(delay, MAX_BACKOFF)
}

/// Statuses worth another attempt: rate limiting and gateway-style failures.
pub fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Parse a `Retry-After` header given in seconds, capped like any other backoff.
pub fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .map(|delay| delay.min(MAX_BACKOFF))
}
