//! Error types and handling for porter-core operations.
//!
//! Every public operation in porter-core returns `Result<T, Error>`. The
//! variants map onto the pipeline's failure taxonomy:
//!
//! - **I/O errors**: filesystem access under the source tree or assets sink
//! - **Network errors**: attachment transfers
//! - **Source errors**: malformed or unreadable input; readers record these
//!   as their sticky `last_error` and the orchestrator aborts at the next
//!   checkpoint
//! - **Rewrite errors**: URL processing failures that are not simple
//!   pass-throughs
//! - **Import errors**: the entity importer rejected an entity
//!
//! Per-item failures (a single fetch, a single entity) are recorded and the
//! pipeline continues; structural failures are fatal. Nothing is retried
//! automatically inside the core — [`Error::is_recoverable`] is the hint
//! surface for caller-level retry policy.

use thiserror::Error;

/// The main error type for porter-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed.
    ///
    /// Covers reads from the source tree, writes into the assets directory,
    /// and lock-file handling. The underlying `std::io::Error` is preserved.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Network operation failed.
    ///
    /// Covers HTTP attachment transfers. The underlying `reqwest::Error` is
    /// preserved for detailed connection information.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The import source is malformed or cannot be decoded.
    ///
    /// Readers surface this as their sticky `last_error`; once set, the
    /// reader produces no further entities.
    #[error("Source error: {0}")]
    Source(String),

    /// URL scanning or rewriting failed structurally.
    ///
    /// A URL that merely cannot be resolved is passed through unchanged and
    /// never raises; this variant covers failures of the rewrite machinery
    /// itself (e.g. a replacement staged for a stale match).
    #[error("Rewrite error: {0}")]
    Rewrite(String),

    /// The entity importer rejected an entity.
    ///
    /// Fatal for that entity. Whether it is fatal for the whole run is the
    /// caller's choice via `MigrationConfig::continue_on_error`.
    #[error("Import error: {0}")]
    Import(String),

    /// Assets sink operation failed beyond basic file I/O.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration is invalid or inaccessible.
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL is malformed or uses an unsupported scheme.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Requested resource was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another migration run holds the advisory lock for the assets
    /// directory.
    #[error("Migration already in progress: {0}")]
    Locked(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error for uncategorized failures.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl Error {
    /// Check if the error might be recoverable through retry logic.
    ///
    /// Returns `true` for errors that are typically temporary: network
    /// timeouts and connection failures, interrupted I/O, and a held
    /// migration lock (the other run will finish). Parse, config, and
    /// import rejections are permanent.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_timeout() || e.is_connect(),
            Self::Locked(_) => true,
            Self::Io(e) => {
                matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
                )
            },
            _ => false,
        }
    }

    /// Get the error category as a string identifier.
    ///
    /// Useful for grouping failures in logs and in the migration summary.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Network(_) => "network",
            Self::Source(_) => "source",
            Self::Rewrite(_) => "rewrite",
            Self::Import(_) => "import",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::InvalidUrl(_) => "invalid_url",
            Self::NotFound(_) => "not_found",
            Self::Locked(_) => "locked",
            Self::Serialization(_) => "serialization",
            Self::Other(_) => "other",
        }
    }
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
