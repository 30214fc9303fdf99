use thiserror::Error;

/// Application-wide error types for Argus.
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// A template referenced a variable with no value and no default.
    #[error("Missing variable: {name}")]
    MissingVariable { name: String },

    /// Template expression could not be parsed or resolved.
    #[error("Template error: {0}")]
    Template(String),

    /// An extraction rule marked `required` produced no value.
    #[error("Required field missing: {field}")]
    RequiredField { field: String },

    /// Extraction failed (bad selector, unparseable body, ...).
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// HTTP transport failure, after transport-level retries are exhausted.
    #[error("Transport error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Transport {
        message: String,
        status: Option<u16>,
        retryable: bool,
    },

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    Network(String),

    /// A URL could not be parsed or resolved.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Unrecoverable run-level condition (malformed start URL, re-entrant run).
    #[error("Engine error: {0}")]
    Engine(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScrapeError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScrapeError::Network(_) | ScrapeError::Timeout(_) => true,
            ScrapeError::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(ScrapeError::Network("reset".into()).is_retryable());
        assert!(ScrapeError::Timeout(30).is_retryable());
        assert!(
            ScrapeError::Transport {
                message: "service unavailable".into(),
                status: Some(503),
                retryable: true,
            }
            .is_retryable()
        );
        assert!(
            !ScrapeError::Transport {
                message: "not found".into(),
                status: Some(404),
                retryable: false,
            }
            .is_retryable()
        );
        assert!(!ScrapeError::RequiredField { field: "title".into() }.is_retryable());
        assert!(!ScrapeError::MissingVariable { name: "page".into() }.is_retryable());
    }

    #[test]
    fn test_transport_error_display_includes_status() {
        let err = ScrapeError::Transport {
            message: "bad gateway".into(),
            status: Some(502),
            retryable: true,
        };
        assert_eq!(err.to_string(), "Transport error (HTTP 502): bad gateway");

        let err = ScrapeError::Transport {
            message: "connection refused".into(),
            status: None,
            retryable: true,
        };
        assert_eq!(err.to_string(), "Transport error: connection refused");
    }
}
