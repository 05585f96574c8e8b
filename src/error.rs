//! Error types for gyazo-drain
//!
//! This module provides the error taxonomy for the migration pipeline:
//! - Run-fatal errors (configuration, rejected credentials, completion log failures)
//! - Transient errors that the retry layer absorbs (timeouts, 5xx, rate limits)
//! - Per-item errors that end up as a `TransferResult::Failed` outcome
//!
//! [`ErrorKind`] is the flat, serializable classification used in per-item
//! results and in structured log fields.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for gyazo-drain operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gyazo-drain
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "output_dir")
        key: Option<String>,
    },

    /// The API rejected the credential (401/403)
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The API asked us to slow down (429)
    #[error("rate limited by remote API")]
    RateLimited {
        /// Server-supplied delay from the `Retry-After` header, if any
        retry_after: Option<Duration>,
    },

    /// Transient network failure (timeout, connection reset, 5xx)
    #[error("transient network error: {0}")]
    Transient(String),

    /// Remote resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Unexpected HTTP status that is neither transient nor an auth failure
    #[error("unexpected HTTP status {status} from {url}")]
    HttpStatus {
        /// The status code returned by the server
        status: u16,
        /// The URL that was requested
        url: String,
    },

    /// Downloaded content failed verification (empty, truncated)
    #[error("verification failed: {0}")]
    Verification(String),

    /// Network error that could not be classified as transient
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Completion log operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was cancelled while the operation was in flight
    #[error("operation cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Completion log errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to open the completion log
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Flat classification of an [`Error`], used in per-item outcomes and logs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid configuration
    Config,
    /// Credential rejected
    Auth,
    /// Rate limited and retries exhausted
    RateLimited,
    /// Transient network failure and retries exhausted
    TransientNetwork,
    /// Remote resource missing
    NotFound,
    /// Unexpected HTTP status
    HttpStatus,
    /// Short, empty or otherwise invalid download
    Verification,
    /// Local I/O failure
    Io,
    /// Completion log failure
    Database,
    /// Malformed API payload
    Serialization,
    /// Aborted by run cancellation
    Cancelled,
    /// Anything else
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Config => "config",
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::NotFound => "not_found",
            ErrorKind::HttpStatus => "http_status",
            ErrorKind::Verification => "verification",
            ErrorKind::Io => "io",
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Shorthand for a configuration error tied to a config key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Classify a `reqwest` failure
    ///
    /// Timeouts, connection failures and body read errors are transient.
    /// Everything else (builder errors, redirect loops, decode errors) is kept
    /// as [`Error::Network`].
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_body() || e.is_request() {
            Error::Transient(e.to_string())
        } else if e.is_decode() {
            Error::Other(format!("malformed response body: {}", e))
        } else {
            Error::Network(e)
        }
    }

    /// Flat classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config { .. } => ErrorKind::Config,
            Error::Auth(_) => ErrorKind::Auth,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::Transient(_) => ErrorKind::TransientNetwork,
            Error::Network(e) if e.is_timeout() || e.is_connect() => ErrorKind::TransientNetwork,
            Error::Network(_) => ErrorKind::Other,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::HttpStatus { .. } => ErrorKind::HttpStatus,
            Error::Verification(_) => ErrorKind::Verification,
            Error::Io(_) => ErrorKind::Io,
            Error::Database(_) | Error::Sqlx(_) => ErrorKind::Database,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether this error must abort the whole run
    ///
    /// Rejected credentials fail every later call too, and a completion log
    /// that cannot be written makes remote deletes unsafe.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config { .. } | Error::Auth(_) | Error::Database(_) | Error::Sqlx(_)
        )
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification_covers_pipeline_errors() {
        let cases = vec![
            (Error::config("output_dir", "not writable"), ErrorKind::Config),
            (Error::Auth("401".into()), ErrorKind::Auth),
            (
                Error::RateLimited {
                    retry_after: Some(Duration::from_secs(3)),
                },
                ErrorKind::RateLimited,
            ),
            (Error::Transient("timeout".into()), ErrorKind::TransientNetwork),
            (Error::NotFound("blob".into()), ErrorKind::NotFound),
            (
                Error::HttpStatus {
                    status: 418,
                    url: "http://x".into(),
                },
                ErrorKind::HttpStatus,
            ),
            (Error::Verification("empty".into()), ErrorKind::Verification),
            (
                Error::Io(std::io::Error::other("disk full")),
                ErrorKind::Io,
            ),
            (
                Error::Database(DatabaseError::QueryFailed("locked".into())),
                ErrorKind::Database,
            ),
            (Error::Cancelled, ErrorKind::Cancelled),
            (Error::Other("?".into()), ErrorKind::Other),
        ];

        for (error, expected) in cases {
            assert_eq!(error.kind(), expected, "wrong kind for {error}");
        }
    }

    #[test]
    fn only_credential_config_and_log_failures_are_fatal() {
        assert!(Error::config("access_token", "missing").is_fatal());
        assert!(Error::Auth("rejected".into()).is_fatal());
        assert!(Error::Database(DatabaseError::QueryFailed("x".into())).is_fatal());

        assert!(!Error::Transient("reset".into()).is_fatal());
        assert!(!Error::RateLimited { retry_after: None }.is_fatal());
        assert!(!Error::NotFound("gone".into()).is_fatal());
        assert!(!Error::Verification("short".into()).is_fatal());
        assert!(!Error::Cancelled.is_fatal());
    }

    #[test]
    fn config_helper_keeps_key() {
        match Error::config("concurrency", "must be at least 1") {
            Error::Config { message, key } => {
                assert_eq!(message, "must be at least 1");
                assert_eq!(key.as_deref(), Some("concurrency"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::TransientNetwork).unwrap();
        assert_eq!(json, "\"transient_network\"");
        assert_eq!(ErrorKind::Verification.to_string(), "verification");
    }
}
