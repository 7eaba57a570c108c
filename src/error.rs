//! Error types for Pacer
//!
//! This module defines the error hierarchy for the whole crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.

use thiserror::Error;

/// The main error type for Pacer
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Request Building Errors
    // ============================================================================
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid header '{name}': {message}")]
    InvalidHeader { name: String, message: String },

    // ============================================================================
    // Rate Limiting Errors
    // ============================================================================
    #[error("Rate limit capacity exhausted for '{identity}', next slot in {retry_after_ms}ms")]
    CapacityExhausted { identity: String, retry_after_ms: u64 },

    #[error("Rate limiter store error: {message}")]
    Store { message: String },

    // ============================================================================
    // Transport Errors
    // ============================================================================
    #[error("Connect timeout: {message}")]
    ConnectTimeout { message: String },

    #[error("Read timeout: {message}")]
    ReadTimeout { message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid header error
    pub fn invalid_header(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a limiter store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a capacity exhausted error
    pub fn capacity_exhausted(identity: impl Into<String>, retry_after_ms: u64) -> Self {
        Self::CapacityExhausted {
            identity: identity.into(),
            retry_after_ms,
        }
    }

    /// Create a connect timeout error
    pub fn connect_timeout(message: impl Into<String>) -> Self {
        Self::ConnectTimeout {
            message: message.into(),
        }
    }

    /// Create a read timeout error
    pub fn read_timeout(message: impl Into<String>) -> Self {
        Self::ReadTimeout {
            message: message.into(),
        }
    }

    /// Check if this error is safe to retry.
    ///
    /// Only connect and read timeouts qualify. Everything else, including
    /// limiter denials, crosses the dispatcher boundary untouched.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ConnectTimeout { .. } | Error::ReadTimeout { .. })
    }

    /// Re-raise a transient error after the retry budget ran out.
    ///
    /// The error kind is preserved; only the message changes.
    pub fn into_exhausted(self, attempts: u32) -> Self {
        match self {
            Error::ConnectTimeout { message } => Error::ConnectTimeout {
                message: format!("tried {attempts} times and failed ({message})"),
            },
            Error::ReadTimeout { message } => Error::ReadTimeout {
                message: format!("tried {attempts} times and failed ({message})"),
            },
            other => other,
        }
    }
}

/// Result type alias for Pacer
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("test message");
        assert_eq!(err.to_string(), "Configuration error: test message");

        let err = Error::capacity_exhausted("crawler", 750);
        assert_eq!(
            err.to_string(),
            "Rate limit capacity exhausted for 'crawler', next slot in 750ms"
        );

        let err = Error::invalid_header("X Bad", "invalid header name");
        assert_eq!(err.to_string(), "Invalid header 'X Bad': invalid header name");
    }

    #[test]
    fn test_is_transient() {
        assert!(Error::connect_timeout("slow handshake").is_transient());
        assert!(Error::read_timeout("slow body").is_transient());

        assert!(!Error::capacity_exhausted("x", 10).is_transient());
        assert!(!Error::config("bad").is_transient());
        assert!(!Error::store("locked").is_transient());
        assert!(!Error::Other("boom".into()).is_transient());
    }

    #[test]
    fn test_into_exhausted_keeps_kind() {
        let err = Error::connect_timeout("Oh no").into_exhausted(11);
        assert!(matches!(err, Error::ConnectTimeout { .. }));
        assert_eq!(
            err.to_string(),
            "Connect timeout: tried 11 times and failed (Oh no)"
        );

        let err = Error::read_timeout("stalled").into_exhausted(3);
        assert!(matches!(err, Error::ReadTimeout { .. }));
        assert!(err.to_string().contains("tried 3 times"));

        let err = Error::config("untouched").into_exhausted(5);
        assert_eq!(err.to_string(), "Configuration error: untouched");
    }
}
