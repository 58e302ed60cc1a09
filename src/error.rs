//! Error types for gamearr
//!
//! This module provides the crate-wide error taxonomy:
//! - Domain-specific error kinds (NotConfigured, NotFound, Integration, etc.)
//! - HTTP status code mapping for boundary translation
//! - Machine-readable error codes for structured failure responses

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for gamearr operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gamearr
///
/// This is the primary error type used throughout the library. Synchronous
/// operations propagate it to the caller; background workers catch it at the
/// tick boundary and log.
#[derive(Debug, Error)]
pub enum Error {
    /// An integration is missing its credentials or endpoint configuration
    #[error("{service} is not configured")]
    NotConfigured {
        /// The integration that is not ready ("prowlarr", "qbittorrent", "igdb")
        service: &'static str,
    },

    /// Entity missing
    #[error("not found: {0}")]
    NotFound(String),

    /// Input violates a constraint
    #[error("validation error: {0}")]
    Validation(String),

    /// Duplicate resource (e.g. game already in library)
    #[error("conflict: {0}")]
    Conflict(String),

    /// An upstream integration rejected or failed a request
    #[error("{service} error: {message}")]
    Integration {
        /// The upstream service that failed
        service: &'static str,
        /// What the upstream reported
        message: String,
    },

    /// A file-path input resolves outside an allowed base directory
    #[error("path traversal attempt: {path}")]
    PathTraversal {
        /// The offending path
        path: PathBuf,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Filesystem error
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure propagated to every waiter of a coalesced in-flight operation
    #[error("{0}")]
    Shared(Arc<Error>),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Constraint violation (e.g. duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl Error {
    /// Integration error from the indexer aggregator
    pub fn prowlarr(message: impl Into<String>) -> Self {
        Error::Integration {
            service: "prowlarr",
            message: message.into(),
        }
    }

    /// Integration error from the torrent daemon
    pub fn qbittorrent(message: impl Into<String>) -> Self {
        Error::Integration {
            service: "qbittorrent",
            message: message.into(),
        }
    }

    /// Integration error from the metadata provider
    pub fn igdb(message: impl Into<String>) -> Self {
        Error::Integration {
            service: "igdb",
            message: message.into(),
        }
    }

    /// True when the error indicates the collaborator is unreachable rather
    /// than a fault in our own state.
    ///
    /// The download monitor uses this to decide between the silent
    /// reconnection discipline and a plain ERROR log.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::NotConfigured { .. } => true,
            Error::Network(e) => e.is_connect() || e.is_timeout(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
            ),
            Error::Integration { message, .. } => {
                let m = message.to_ascii_lowercase();
                m.contains("connection") || m.contains("timeout") || m.contains("unreachable")
            }
            Error::Shared(inner) => inner.is_connection_error(),
            _ => false,
        }
    }
}

/// Convert errors to HTTP status codes for boundary translation
///
/// The HTTP surface (out of scope for this crate) maps each error to a
/// `{success: false, error, code}` body with the status from this trait.
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - client must fix configuration or input
            Error::NotConfigured { .. } => 400,
            Error::Validation(_) => 400,

            // 403 Forbidden - path escapes an allowed base
            Error::PathTraversal { .. } => 403,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 409 Conflict - duplicate resource
            Error::Conflict(_) => 409,

            // 502 Bad Gateway - upstream integrations
            Error::Integration { .. } => 502,
            Error::Network(_) => 502,

            // 500 Internal Server Error
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::Other(_) => 500,

            Error::Shared(inner) => inner.status_code(),
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::NotConfigured { .. } => "not_configured",
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation_error",
            Error::Conflict(_) => "conflict",
            Error::Integration { service, .. } => match *service {
                "prowlarr" => "prowlarr_error",
                "qbittorrent" => "qbittorrent_error",
                "igdb" => "igdb_error",
                _ => "integration_error",
            },
            Error::PathTraversal { .. } => "path_traversal",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Io(_) => "filesystem_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Shared(inner) => inner.error_code(),
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Arc<Error>> for Error {
    fn from(inner: Arc<Error>) -> Self {
        Error::Shared(inner)
    }
}
