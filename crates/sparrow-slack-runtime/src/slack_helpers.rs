//! Retry and truncation helpers shared by the Slack API client and renderer.

use std::time::Duration;

pub(crate) fn is_retryable_slack_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

pub(crate) fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    let seconds = raw.parse::<u64>().ok()?;
    Some(Duration::from_secs(seconds))
}

pub(crate) fn retry_delay(
    base_delay_ms: u64,
    attempt: usize,
    retry_after: Option<Duration>,
) -> Duration {
    let shift = attempt.min(6) as u32;
    let backoff = Duration::from_millis(base_delay_ms.max(1).saturating_mul(1_u64 << shift));
    match retry_after {
        Some(retry_after) => backoff.max(retry_after),
        None => backoff,
    }
}

pub(crate) fn truncate_for_error(value: &str, max_chars: usize) -> String {
    sparrow_core::truncate_for_log(value, max_chars)
}

/// Slack rejects payloads past ~40k characters; trim on a char boundary.
pub(crate) fn truncate_for_slack(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let kept = value
        .chars()
        .take(max_chars.saturating_sub(20))
        .collect::<String>();
    format!("{kept}\n... (truncated)")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{is_retryable_slack_status, retry_delay, truncate_for_slack};

    #[test]
    fn unit_retryable_slack_statuses() {
        assert!(is_retryable_slack_status(429));
        assert!(is_retryable_slack_status(500));
        assert!(!is_retryable_slack_status(403));
    }

    #[test]
    fn unit_retry_delay_respects_retry_after_floor() {
        assert_eq!(retry_delay(100, 0, None), Duration::from_millis(100));
        assert_eq!(retry_delay(100, 2, None), Duration::from_millis(400));
        assert_eq!(
            retry_delay(100, 0, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn unit_truncate_for_slack_marks_trimmed_payloads() {
        let long = "x".repeat(100);
        let trimmed = truncate_for_slack(&long, 50);
        assert!(trimmed.len() < long.len());
        assert!(trimmed.ends_with("... (truncated)"));
        assert_eq!(truncate_for_slack("short", 50), "short");
    }
}
