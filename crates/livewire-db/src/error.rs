//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] errors with additional context about which operation failed.

use livewire_types::DocumentId;

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The URI names a scheme no backend handles.
    #[error("Unsupported database scheme: {0}")]
    UnsupportedScheme(String),

    /// The URI could not be parsed.
    #[error("Invalid database URI: {0}")]
    InvalidUri(String),

    /// An operation needed a live connection but none is open.
    #[error("Database is not connected")]
    NotConnected,

    /// A connect was attempted while a connection is already open.
    #[error("Database is already connected to {0}")]
    AlreadyConnected(String),

    /// Connecting took longer than the configured timeout.
    #[error("Database operation timed out after {millis}ms")]
    Timeout {
        /// The timeout that elapsed, in milliseconds.
        millis: u128,
    },

    /// A document was not found.
    #[error("Document not found: {model}/{id}")]
    NotFound {
        /// Model the lookup targeted.
        model: String,
        /// Missing document.
        id: DocumentId,
    },
}
