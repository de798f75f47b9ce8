use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

const BACKOFF_CEILING: Duration = Duration::from_secs(30);

/// How a non-success response is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusClass {
    NotFound,
    /// Rate limited or server side; worth another attempt.
    Retryable,
    Fatal,
}

pub(crate) fn classify_status(status: StatusCode) -> StatusClass {
    if status == StatusCode::NOT_FOUND {
        StatusClass::NotFound
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StatusClass::Retryable
    } else {
        StatusClass::Fatal
    }
}

/// Timeouts, refused connections and failed sends. Builder errors are not.
pub(crate) fn transport_is_retryable(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// `retry-after` in delta seconds. HTTP dates are ignored.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    pub(crate) fn new(max_attempts: usize, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    pub(crate) fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Wait before the attempt following `attempt` (1-based), or `None` once
    /// every attempt is spent. Doubles per attempt up to 30s; a server hint
    /// never shortens the base delay.
    pub(crate) fn backoff(&self, attempt: usize, hint: Option<Duration>) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(match hint {
            Some(hint) => hint.max(self.base_delay),
            None => {
                let doublings = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.base_delay
                    .checked_mul(2_u32.saturating_pow(doublings.min(16)))
                    .map_or(BACKOFF_CEILING, |delay| delay.min(BACKOFF_CEILING))
            }
        })
    }
}

/// Shortens an error body to `max_chars` characters plus an ellipsis.
pub(crate) fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
