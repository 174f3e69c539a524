//! Backend error type shared by model and embedding calls.
//!
//! Every failure of an upstream provider surfaces as one [`LlmError`], tagged with the
//! provider that produced it and, when there was an HTTP exchange, the status code and
//! body. The kind decides whether a retry is worthwhile.

use std::time::Duration;

/// Error from a model or embedding backend call.
#[derive(Debug, Clone)]
pub struct LlmError {
    /// The kind of error
    pub kind: LlmErrorKind,
    /// Provider that produced the error (`openai`, `gemini`, `voyage`, ...)
    pub provider: String,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    /// Upstream message or response body
    pub message: String,
    /// Suggested retry delay (from Retry-After header)
    pub retry_after: Option<Duration>,
}

impl LlmError {
    fn with_kind(kind: LlmErrorKind, provider: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            provider: provider.to_string(),
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Build an error from a non-success HTTP status.
    pub fn from_status(
        provider: &str,
        status_code: u16,
        body: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        Self {
            kind: classify_http_status(status_code),
            provider: provider.to_string(),
            status_code: Some(status_code),
            message: body.into(),
            retry_after,
        }
    }

    /// Build an error from a transport failure.
    pub fn from_transport(provider: &str, err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("Request timeout: {}", err)
        } else if err.is_connect() {
            format!("Connection failed: {}", err)
        } else {
            format!("Request failed: {}", err)
        };
        Self::network_error(provider, message)
    }

    /// Create a network error.
    pub fn network_error(provider: &str, message: impl Into<String>) -> Self {
        Self::with_kind(LlmErrorKind::NetworkError, provider, message)
    }

    /// Create a response-shape error.
    pub fn parse_error(provider: &str, message: impl Into<String>) -> Self {
        Self::with_kind(LlmErrorKind::ParseError, provider, message)
    }

    /// Create an error for a provider that is missing its key or endpoint.
    pub fn not_configured(provider: &str, message: impl Into<String>) -> Self {
        Self::with_kind(LlmErrorKind::NotConfigured, provider, message)
    }

    /// Check if this error is transient and should be retried.
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Get the suggested delay before retry attempt `attempt` (0-based).
    ///
    /// A server-provided `Retry-After` always wins; otherwise exponential backoff from a
    /// per-kind base, with a small deterministic jitter, capped at 60 seconds.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after;
        }

        let base_secs: u64 = match self.kind {
            LlmErrorKind::RateLimited => 5,
            LlmErrorKind::ServerError => 2,
            _ => 1,
        };
        let delay_secs = base_secs.saturating_mul(2u64.saturating_pow(attempt));
        let jitter_range = delay_secs / 4;
        let jitter = if jitter_range > 0 {
            (u64::from(attempt) * 7) % jitter_range
        } else {
            0
        };

        Duration::from_secs((delay_secs + jitter).min(60))
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(
                f,
                "{} {} (HTTP {}): {}",
                self.provider, self.kind, code, self.message
            ),
            None => write!(f, "{} {}: {}", self.provider, self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Classification of backend errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Rate limited (429) - transient, should retry with backoff
    RateLimited,
    /// Server error (5xx) - transient, should retry
    ServerError,
    /// Client error (400, 401, 403, 404) - permanent
    ClientError,
    /// Network error (connection failed, timeout) - transient
    NetworkError,
    /// Response was not in the expected shape - permanent
    ParseError,
    /// Provider selected without the key/endpoint it needs - permanent
    NotConfigured,
}

impl LlmErrorKind {
    /// Check if this error kind is transient (should retry).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::NetworkError
        )
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmErrorKind::RateLimited => write!(f, "rate limited"),
            LlmErrorKind::ServerError => write!(f, "server error"),
            LlmErrorKind::ClientError => write!(f, "client error"),
            LlmErrorKind::NetworkError => write!(f, "network error"),
            LlmErrorKind::ParseError => write!(f, "malformed response"),
            LlmErrorKind::NotConfigured => write!(f, "not configured"),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Maximum total time to spend retrying
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            max_retry_duration: Duration::ZERO,
        }
    }

    /// Check if the given error should be retried after `attempt` earlier retries.
    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }
}

/// Map an HTTP status code to an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LlmErrorKind::RateLimited.is_transient());
        assert!(LlmErrorKind::ServerError.is_transient());
        assert!(LlmErrorKind::NetworkError.is_transient());
        assert!(!LlmErrorKind::ClientError.is_transient());
        assert!(!LlmErrorKind::ParseError.is_transient());
        assert!(!LlmErrorKind::NotConfigured.is_transient());
    }

    #[test]
    fn test_http_status_classification() {
        assert_eq!(classify_http_status(429), LlmErrorKind::RateLimited);
        assert_eq!(classify_http_status(500), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(503), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(401), LlmErrorKind::ClientError);
        assert_eq!(classify_http_status(404), LlmErrorKind::ClientError);
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let error = LlmError::from_status("openai", 429, "slow down", None);
        assert!(error.suggested_delay(1) > error.suggested_delay(0));
        assert!(error.suggested_delay(2) > error.suggested_delay(1));
        assert!(error.suggested_delay(10).as_secs() <= 60);
    }

    #[test]
    fn test_retry_after_respected() {
        let error =
            LlmError::from_status("openai", 429, "slow down", Some(Duration::from_secs(30)));
        assert_eq!(error.suggested_delay(0), Duration::from_secs(30));
        assert_eq!(error.suggested_delay(5), Duration::from_secs(30));
    }

    #[test]
    fn test_display_carries_provider_and_status() {
        let error = LlmError::from_status("gemini", 400, "bad key", None);
        let text = error.to_string();
        assert!(text.contains("gemini"));
        assert!(text.contains("HTTP 400"));
        assert!(text.contains("bad key"));
    }

    #[test]
    fn test_retry_policy() {
        let config = RetryConfig::default();
        let transient = LlmError::network_error("ollama", "refused");
        let permanent = LlmError::from_status("ollama", 400, "bad", None);
        assert!(config.should_retry(&transient, 0));
        assert!(!config.should_retry(&transient, 3));
        assert!(!config.should_retry(&permanent, 0));
        assert!(!RetryConfig::disabled().should_retry(&transient, 0));
    }
}
