//! Shared reqwest plumbing for the remote collaborators.

use std::time::Duration;

use chrono::Utc;
use migrator_core::{RawError, RawErrorKind};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;

/// Longest error body excerpt carried into a [`RawError`] message.
const BODY_EXCERPT: usize = 512;

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Attachments larger than this are rejected mid-stream.
    pub max_download_bytes: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_download_bytes: 50 * 1024 * 1024,
            user_agent: format!("forum-migrate/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

pub fn build_client(settings: &HttpSettings) -> Result<reqwest::Client, RawError> {
    reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .user_agent(settings.user_agent.clone())
        .build()
        .map_err(|err| RawError::new(RawErrorKind::Transport, err.to_string()))
}

pub fn map_reqwest_error(err: reqwest::Error) -> RawError {
    if err.is_timeout() {
        return RawError::new(RawErrorKind::Timeout, err.to_string());
    }
    if err.is_decode() {
        return RawError::new(RawErrorKind::Decode, err.to_string());
    }
    if let Some(status) = err.status() {
        return RawError::new(RawErrorKind::Status(status.as_u16()), err.to_string());
    }
    RawError::new(RawErrorKind::Transport, err.to_string())
}

/// Turns a non-success response into a [`RawError`], keeping any reset hint.
pub async fn status_error(response: reqwest::Response) -> RawError {
    let status = response.status();
    let retry_after = reset_hint(response.headers());
    let body = response.text().await.unwrap_or_default();
    let mut excerpt: String = body.chars().take(BODY_EXCERPT).collect();
    if excerpt.trim().is_empty() {
        excerpt = status.to_string();
    }
    RawError::new(RawErrorKind::Status(status.as_u16()), excerpt).with_retry_after(retry_after)
}

/// Reads `Retry-After` seconds, or GitHub's `x-ratelimit-reset` epoch when the
/// remaining quota is zero.
pub fn reset_hint(headers: &HeaderMap) -> Option<Duration> {
    let header_str = move |name: &str| headers.get(name).and_then(|value| value.to_str().ok());

    if let Some(seconds) = headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
    {
        return Some(Duration::from_secs(seconds));
    }

    let exhausted = header_str("x-ratelimit-remaining").map(str::trim) == Some("0");
    if !exhausted {
        return None;
    }
    let reset_at = header_str("x-ratelimit-reset")?.trim().parse::<i64>().ok()?;
    let remaining = reset_at - Utc::now().timestamp();
    Some(Duration::from_secs(u64::try_from(remaining.max(1)).unwrap_or(1)))
}

/// Checks the status, then decodes the body as JSON.
pub async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RawError> {
    if !response.status().is_success() {
        return Err(status_error(response).await);
    }
    let bytes = response.bytes().await.map_err(map_reqwest_error)?;
    serde_json::from_slice(&bytes)
        .map_err(|err| RawError::new(RawErrorKind::Decode, format!("invalid JSON response: {err}")))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::header::{HeaderMap, HeaderValue};

    use super::reset_hint;

    #[test]
    fn retry_after_seconds_win() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("30"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        assert_eq!(reset_hint(&headers), Some(Duration::from_secs(30)));
    }

    #[test]
    fn remaining_quota_means_no_hint() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("12"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("99999999999"));
        assert_eq!(reset_hint(&headers), None);
    }

    #[test]
    fn past_reset_epoch_still_waits_a_second() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1"));
        assert_eq!(reset_hint(&headers), Some(Duration::from_secs(1)));
    }
}
