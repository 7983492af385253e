#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {status} - {body}")]
    Http { status: u16, body: String },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("context window exceeded: {0}")]
    ContextOverflow(String),
}

const DEFAULT_RATE_LIMIT_WAIT_MS: u64 = 1_000;

impl ProviderError {
    pub fn from_http(status: u16, body: String, retry_after: Option<&str>) -> Self {
        if status == 429 {
            let retry_after_ms = retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1_000)
                .unwrap_or(DEFAULT_RATE_LIMIT_WAIT_MS);
            return ProviderError::RateLimited { retry_after_ms };
        }
        if status == 400 && body.contains("context") && body.contains("length") {
            return ProviderError::ContextOverflow(body);
        }
        ProviderError::Http { status, body }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } => true,
            ProviderError::Timeout(_) => true,
            ProviderError::Stream(_) => true,
            ProviderError::Http { status, .. } => *status == 408 || *status >= 500,
            ProviderError::ContextOverflow(_) => false,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_carries_retry_after() {
        let e = ProviderError::from_http(429, "slow down".into(), Some("2"));
        assert!(e.is_retryable());
        assert_eq!(e.retry_after_ms(), Some(2_000));
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(ProviderError::from_http(500, String::new(), None).is_retryable());
        assert!(ProviderError::from_http(503, String::new(), None).is_retryable());
        assert!(ProviderError::from_http(408, String::new(), None).is_retryable());
        assert!(!ProviderError::from_http(401, String::new(), None).is_retryable());
        assert!(!ProviderError::from_http(404, String::new(), None).is_retryable());
    }

    #[test]
    fn context_overflow_detected() {
        let e = ProviderError::from_http(
            400,
            "maximum context length exceeded".into(),
            None,
        );
        assert!(matches!(e, ProviderError::ContextOverflow(_)));
        assert!(!e.is_retryable());
    }
}
