//! Retry eligibility and backoff for the request pipeline.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::StatusCode;

use crate::config::RetrySettings;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetrySettings::default().into()
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
            max_total_wait: settings.max_total_wait,
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the jitter window for the `retry`-th retry (0-based):
    /// `min(cap, base * 2^retry)`.
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Full jitter: uniform in `[0, ceiling]`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let ceiling = self.backoff_ceiling(retry).as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

/// How a request may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    /// GET/HEAD/PUT and idempotency-keyed transfers.
    Idempotent,
    /// POST/PATCH/DELETE: pre-response failures, or 429/503 carrying `Retry-After`.
    NonIdempotent,
    /// Upload commit: only pre-response network failures.
    PreResponseOnly,
}

impl RetryMode {
    pub fn for_method(method: &reqwest::Method) -> Self {
        if *method == reqwest::Method::GET
            || *method == reqwest::Method::HEAD
            || *method == reqwest::Method::PUT
        {
            Self::Idempotent
        } else {
            Self::NonIdempotent
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the computed backoff, or the server's hint when present.
    Retry { server_hint: Option<Duration> },
    /// Rotate the bearer token and retry immediately.
    RotateAndRetry,
    GiveUp,
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

/// Decision for a non-success response.
pub fn decide_for_status(
    mode: RetryMode,
    status: StatusCode,
    retry_after: Option<Duration>,
    already_rotated: bool,
) -> RetryDecision {
    if status == StatusCode::UNAUTHORIZED {
        return if already_rotated || mode == RetryMode::PreResponseOnly {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RotateAndRetry
        };
    }
    if !is_retryable_status(status) {
        return RetryDecision::GiveUp;
    }
    match mode {
        RetryMode::Idempotent => RetryDecision::Retry {
            server_hint: retry_after,
        },
        RetryMode::NonIdempotent => {
            let hinted = matches!(status.as_u16(), 429 | 503) && retry_after.is_some();
            if hinted {
                RetryDecision::Retry {
                    server_hint: retry_after,
                }
            } else {
                RetryDecision::GiveUp
            }
        }
        RetryMode::PreResponseOnly => RetryDecision::GiveUp,
    }
}

/// Decision for a transport failure. `pre_response` means the request
/// provably never produced a response (dial failure, reset or EOF before headers).
pub fn decide_for_transport(mode: RetryMode, pre_response: bool) -> RetryDecision {
    match mode {
        RetryMode::Idempotent => RetryDecision::Retry { server_hint: None },
        RetryMode::NonIdempotent | RetryMode::PreResponseOnly if pre_response => {
            RetryDecision::Retry { server_hint: None }
        }
        _ => RetryDecision::GiveUp,
    }
}

/// Parses `Retry-After` as delta-seconds or an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
