//! Failure classification shared by every remote collaborator.
//!
//! Collaborators report failures as [`RawError`]s. The retry executor only
//! ever looks at the [`ErrorClass`] a collaborator assigns to them, so each
//! collaborator may override the mapping while this module supplies the
//! default one.

use std::fmt;
use std::time::Duration;

/// Wait assumed for a primary quota exhaustion when the server gives no hint.
pub const DEFAULT_RATE_LIMIT_RESET: Duration = Duration::from_secs(60 * 60);
/// Wait assumed for secondary (abuse) limits, which reset much faster.
pub const SECONDARY_RATE_LIMIT_RESET: Duration = Duration::from_secs(10 * 60);

const RATE_LIMIT_SIGNATURES: &[&str] = &[
    "rate limit",
    "rate-limit",
    "ratelimit",
    "secondary rate limit",
    "abuse detection",
    "too many requests",
];

const RETRYABLE_SIGNATURES: &[&str] = &[
    "connection reset",
    "connection refused",
    "timeout",
    "timed out",
    "temporary failure",
    "network is unreachable",
    "no such host",
    "server error",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "unexpected eof",
    "broken pipe",
];

const PERMANENT_SIGNATURES: &[&str] = &[
    "unauthorized",
    "forbidden",
    "not found",
    "bad request",
    "invalid",
    "malformed",
    "bad credentials",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawErrorKind {
    /// Connection-level failure before a response arrived.
    Transport,
    Timeout,
    /// Non-success HTTP status.
    Status(u16),
    /// Error reported inside a successful response body, with the API's code.
    Api(String),
    /// Response body could not be decoded.
    Decode,
    /// Local filesystem failure.
    Io,
}

impl fmt::Display for RawErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawErrorKind::Transport => write!(f, "transport error"),
            RawErrorKind::Timeout => write!(f, "timeout"),
            RawErrorKind::Status(code) => write!(f, "http status {code}"),
            RawErrorKind::Api(code) => write!(f, "api error {code}"),
            RawErrorKind::Decode => write!(f, "decode error"),
            RawErrorKind::Io => write!(f, "io error"),
        }
    }
}

/// An unclassified failure as reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RawError {
    pub kind: RawErrorKind,
    pub message: String,
    /// Server-provided hint for when a quota resets.
    pub retry_after: Option<Duration>,
}

impl RawError {
    pub fn new(kind: RawErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Will fail again; never retried.
    Permanent,
    /// Transient; retried with backoff.
    Retryable,
    /// Explicit quota signal; retried after the estimated reset.
    RateLimited { reset_after: Duration },
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Permanent => write!(f, "permanent"),
            ErrorClass::Retryable => write!(f, "retryable"),
            ErrorClass::RateLimited { reset_after } => {
                write!(f, "rate limited (reset in {}s)", reset_after.as_secs())
            }
        }
    }
}

pub fn is_rate_limit_signature(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    RATE_LIMIT_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Default mapping from a raw failure to a retry class.
///
/// Rate-limit signatures are checked before anything else so a quota error
/// is never mistaken for a permanent one (GitHub answers secondary limits
/// with 403).
pub fn classify_default(err: &RawError) -> ErrorClass {
    if err.kind == RawErrorKind::Status(429) || is_rate_limit_signature(&err.message) {
        return ErrorClass::RateLimited {
            reset_after: estimate_reset(err),
        };
    }

    match &err.kind {
        RawErrorKind::Status(400 | 401 | 403 | 404 | 410 | 413 | 422) => {
            return ErrorClass::Permanent
        }
        RawErrorKind::Status(408) => return ErrorClass::Retryable,
        RawErrorKind::Status(code) if *code >= 500 => return ErrorClass::Retryable,
        RawErrorKind::Decode | RawErrorKind::Io => return ErrorClass::Permanent,
        RawErrorKind::Timeout | RawErrorKind::Transport => return ErrorClass::Retryable,
        _ => {}
    }

    let lower = err.message.to_ascii_lowercase();
    if RETRYABLE_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return ErrorClass::Retryable;
    }
    if PERMANENT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return ErrorClass::Permanent;
    }
    ErrorClass::Retryable
}

fn estimate_reset(err: &RawError) -> Duration {
    if let Some(hint) = err.retry_after {
        return hint;
    }
    let lower = err.message.to_ascii_lowercase();
    if lower.contains("secondary rate limit") || lower.contains("abuse detection") {
        SECONDARY_RATE_LIMIT_RESET
    } else {
        DEFAULT_RATE_LIMIT_RESET
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn text(message: &str) -> RawError {
        RawError::new(RawErrorKind::Api("UNKNOWN".into()), message)
    }

    #[test]
    fn rate_limit_text_beats_permanent_status() {
        let err = RawError::new(
            RawErrorKind::Status(403),
            "You have exceeded a secondary rate limit",
        );
        assert_eq!(
            classify_default(&err),
            ErrorClass::RateLimited {
                reset_after: SECONDARY_RATE_LIMIT_RESET
            }
        );
    }

    #[test]
    fn retry_after_header_is_used_as_reset() {
        let err = RawError::new(RawErrorKind::Status(429), "slow down")
            .with_retry_after(Some(Duration::from_secs(42)));
        assert_eq!(
            classify_default(&err),
            ErrorClass::RateLimited {
                reset_after: Duration::from_secs(42)
            }
        );
    }

    #[test]
    fn statuses_map_to_classes() {
        for code in [400, 401, 403, 404, 413, 422] {
            let err = RawError::new(RawErrorKind::Status(code), "nope");
            assert_eq!(classify_default(&err), ErrorClass::Permanent, "{code}");
        }
        for code in [408, 500, 502, 503, 504] {
            let err = RawError::new(RawErrorKind::Status(code), "hiccup");
            assert_eq!(classify_default(&err), ErrorClass::Retryable, "{code}");
        }
    }

    #[test]
    fn text_signatures_are_consulted_for_api_errors() {
        assert_eq!(classify_default(&text("connection reset by peer")), ErrorClass::Retryable);
        assert_eq!(classify_default(&text("Could not resolve: not found")), ErrorClass::Permanent);
        assert_eq!(classify_default(&text("something odd")), ErrorClass::Retryable);
        assert!(matches!(
            classify_default(&text("API rate limit exceeded for user")),
            ErrorClass::RateLimited { .. }
        ));
    }
}
