use thiserror::Error;

/// Crate-wide error type. Variants map to the categories the tool boundary
/// cares about: validation, not-found, transient upstream, permanent
/// upstream, configuration, cancellation.
#[derive(Debug, Error)]
pub enum MedlitError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{api} request failed: {message}")]
    Api { api: String, message: String },

    #[error("{api} returned invalid JSON")]
    ApiJson {
        api: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{entity} \"{id}\" not found. {suggestion}")]
    NotFound {
        entity: String,
        id: String,
        suggestion: String,
    },

    #[error("{api} rate limited")]
    RateLimited {
        api: String,
        retry_after: Option<f64>,
    },

    #[error("{api} circuit open, failing fast")]
    CircuitOpen { api: String },

    #[error("{api} timed out")]
    Timeout { api: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP request failed: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MedlitError {
    /// Whether a caller may reasonably retry the failed operation.
    /// Transient network errors, 5xx, 429, and open circuits qualify;
    /// validation, not-found, and configuration errors never do.
    pub fn retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::CircuitOpen { .. } | Self::Timeout { .. } => true,
            Self::Request(err) => err.is_timeout() || err.is_connect(),
            Self::Middleware(err) => match err {
                reqwest_middleware::Error::Reqwest(e) => e.is_timeout() || e.is_connect(),
                reqwest_middleware::Error::Middleware(_) => true,
            },
            Self::Api { message, .. } => {
                message.contains("HTTP 5") || message.contains("HTTP 429")
            }
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            Self::CircuitOpen { .. } => Some(60.0),
            _ => None,
        }
    }

    /// Structured error envelope returned by every tool on failure.
    pub fn to_envelope(&self) -> serde_json::Value {
        let mut envelope = serde_json::json!({
            "error": self.to_string(),
            "retryable": self.retryable(),
        });
        let map = envelope.as_object_mut().expect("envelope is an object");
        if let Self::NotFound { suggestion, .. } = self {
            map.insert("suggestion".into(), suggestion.clone().into());
        }
        if let Self::InvalidArgument(message) = self
            && let Some(example) = message.split("Example: ").nth(1)
        {
            map.insert("example".into(), example.trim().into());
        }
        if let Some(secs) = self.retry_after() {
            map.insert("retry_after".into(), secs.into());
        }
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_retryable() {
        let err = MedlitError::RateLimited {
            api: "pubmed".into(),
            retry_after: Some(2.0),
        };
        assert!(err.retryable());
        assert_eq!(err.retry_after(), Some(2.0));
    }

    #[test]
    fn invalid_argument_is_not_retryable() {
        let err = MedlitError::InvalidArgument("bad limit".into());
        assert!(!err.retryable());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn api_5xx_is_retryable_but_4xx_is_not() {
        let err_503 = MedlitError::Api {
            api: "europepmc".into(),
            message: "HTTP 503 Service Unavailable".into(),
        };
        let err_400 = MedlitError::Api {
            api: "europepmc".into(),
            message: "HTTP 400 Bad Request".into(),
        };
        assert!(err_503.retryable());
        assert!(!err_400.retryable());
    }

    #[test]
    fn envelope_carries_suggestion_and_retry_flag() {
        let err = MedlitError::NotFound {
            entity: "article".into(),
            id: "99999999".into(),
            suggestion: "Try searching: medlit search -q \"99999999\"".into(),
        };
        let envelope = err.to_envelope();
        assert_eq!(envelope["retryable"], false);
        assert!(
            envelope["suggestion"]
                .as_str()
                .unwrap()
                .contains("medlit search")
        );
    }

    #[test]
    fn envelope_extracts_example_from_invalid_argument() {
        let err = MedlitError::InvalidArgument(
            "ID must be a PMID. Example: medlit get 22663011".into(),
        );
        let envelope = err.to_envelope();
        assert_eq!(envelope["example"], "medlit get 22663011");
    }
}
