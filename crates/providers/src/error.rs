use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider}: no API key configured")]
    MissingKey { provider: &'static str },

    #[error("{provider}: HTTP {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider}: {source}")]
    Network {
        provider: &'static str,
        source: reqwest::Error,
    },

    #[error("{provider}: malformed response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    #[error("all providers failed, last: {last}")]
    Exhausted { last: Box<ProviderError> },
}

impl ProviderError {
    /// Whether failover to the next configured provider makes sense.
    /// Client errors other than timeout/rate-limit abort the chain: the
    /// request itself is bad and would fail everywhere.
    pub fn retryable(&self) -> bool {
        match self {
            Self::MissingKey { .. } => true,
            Self::Network { .. } => true,
            Self::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            },
            Self::InvalidResponse { .. } => false,
            Self::Exhausted { .. } => false,
        }
    }

    /// The provider that produced this error, for the 502 body.
    pub fn provider(&self) -> &'static str {
        match self {
            Self::MissingKey { provider }
            | Self::Status { provider, .. }
            | Self::Network { provider, .. }
            | Self::InvalidResponse { provider, .. } => provider,
            Self::Exhausted { last } => last.provider(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        let err = |status| ProviderError::Status {
            provider: "openai",
            status,
            body: String::new(),
        };
        assert!(err(500).retryable());
        assert!(err(503).retryable());
        assert!(err(429).retryable());
        assert!(err(408).retryable());
        assert!(!err(400).retryable());
        assert!(!err(401).retryable());
        assert!(!err(404).retryable());
    }

    #[test]
    fn missing_key_is_retryable() {
        assert!(
            ProviderError::MissingKey { provider: "gemini" }.retryable()
        );
    }

    #[test]
    fn exhausted_reports_last_provider() {
        let err = ProviderError::Exhausted {
            last: Box::new(ProviderError::Status {
                provider: "anthropic",
                status: 500,
                body: "boom".into(),
            }),
        };
        assert_eq!(err.provider(), "anthropic");
        assert!(!err.retryable());
    }
}
