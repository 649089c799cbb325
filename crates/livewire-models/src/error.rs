//! Error types for the model registry.
//!
//! [`ModelError`] covers schema construction and document mutations.
//! Connection registration has its own [`RegistrationError`] because those
//! failures are isolated per model and collected, never propagated.

use livewire_db::DbError;
use livewire_types::{ConnectionId, DocumentId};

/// Errors raised while building the registry or mutating documents.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// No model with this name exists in the registry.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// The schema description is inconsistent.
    #[error("schema error: {0}")]
    Schema(String),

    /// A document body is malformed.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// A relation field names a document that does not exist.
    #[error("{model}.{field} references missing document {id}")]
    InvalidReference {
        /// Model holding the relation field.
        model: String,
        /// The relation field.
        field: String,
        /// The missing target.
        id: DocumentId,
    },

    /// The document to update or delete does not exist.
    #[error("document not found: {model}/{id}")]
    NotFound {
        /// Model that was searched.
        model: String,
        /// Missing document.
        id: DocumentId,
    },

    /// The database link failed.
    #[error("database error: {0}")]
    Database(#[from] DbError),
}

/// Why a connection could not be registered with one model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    /// The connection closed before registration.
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    /// The model already holds its maximum number of connections.
    #[error("connection limit of {limit} reached")]
    Capacity {
        /// Configured per-model limit.
        limit: usize,
    },
}

/// A registration failure attributed to one model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to register connection with {model}: {source}")]
pub struct ModelRegistrationError {
    /// The model whose registration failed.
    pub model: String,
    /// What went wrong.
    #[source]
    pub source: RegistrationError,
}
