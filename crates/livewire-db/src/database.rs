//! Backend dispatch for document storage.
//!
//! [`Database`] uses enum dispatch instead of trait objects because async
//! methods are not dyn-compatible. The backend is chosen from the URI
//! scheme at connect time.

use std::time::Duration;

use livewire_types::{Document, DocumentId};

use crate::error::DbError;
use crate::memory::MemoryStore;
use crate::postgres::PostgresStore;
use crate::uri::DatabaseUri;

/// Default maximum number of connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default idle timeout in seconds.
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Driver options passed alongside the URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Login user, if the server requires one.
    pub username: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Upper bound on establishing the connection.
    pub connect_timeout: Duration,
    /// Idle pooled connections are closed after this long.
    pub idle_timeout: Duration,
    /// Create the `documents` table on connect.
    pub run_migrations: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            run_migrations: true,
        }
    }
}

impl ConnectOptions {
    /// Set the login credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// One staged write in a [`Database::commit`] batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Store a new document.
    Insert(Document),
    /// Overwrite an existing document.
    Replace(Document),
    /// Remove an existing document.
    Delete {
        /// Model of the document.
        model: String,
        /// The document to remove.
        id: DocumentId,
    },
}

impl Write {
    /// Model the write targets.
    pub fn model(&self) -> &str {
        match self {
            Self::Insert(doc) | Self::Replace(doc) => &doc.model,
            Self::Delete { model, .. } => model,
        }
    }

    /// Document the write targets.
    pub const fn id(&self) -> DocumentId {
        match self {
            Self::Insert(doc) | Self::Replace(doc) => doc.id,
            Self::Delete { id, .. } => *id,
        }
    }
}

/// A live connection to one document backend.
#[derive(Debug, Clone)]
pub enum Database {
    /// `PostgreSQL` with `JSONB` document bodies.
    Postgres(PostgresStore),
    /// In-process storage.
    Memory(MemoryStore),
}

impl Database {
    /// Connect to the backend selected by the URI scheme.
    ///
    /// The whole attempt is bounded by `options.connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UnsupportedScheme`] for unknown schemes,
    /// [`DbError::Timeout`] when the timeout elapses, or the backend's
    /// own connect error.
    pub async fn connect(uri: &DatabaseUri, options: &ConnectOptions) -> Result<Self, DbError> {
        match uri.scheme.as_str() {
            "postgres" | "postgresql" => {
                let connect = PostgresStore::connect(uri, options);
                match tokio::time::timeout(options.connect_timeout, connect).await {
                    Ok(store) => Ok(Self::Postgres(store?)),
                    Err(_elapsed) => Err(DbError::Timeout {
                        millis: options.connect_timeout.as_millis(),
                    }),
                }
            }
            "memory" => Ok(Self::Memory(MemoryStore::connect(uri))),
            other => Err(DbError::UnsupportedScheme(other.to_owned())),
        }
    }

    /// Release the connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotConnected`] if it was already released.
    pub async fn disconnect(&self) -> Result<(), DbError> {
        match self {
            Self::Postgres(store) => store.close().await,
            Self::Memory(store) => store.close(),
        }
    }

    /// Human-readable backend name for logging.
    pub const fn backend(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Memory(_) => "memory",
        }
    }

    /// Insert a new document.
    pub async fn insert(&self, doc: &Document) -> Result<(), DbError> {
        match self {
            Self::Postgres(store) => store.insert(doc).await,
            Self::Memory(store) => store.insert(doc).await,
        }
    }

    /// Fetch one document.
    pub async fn get(&self, model: &str, id: DocumentId) -> Result<Option<Document>, DbError> {
        match self {
            Self::Postgres(store) => store.get(model, id).await,
            Self::Memory(store) => store.get(model, id).await,
        }
    }

    /// Overwrite an existing document.
    pub async fn replace(&self, doc: &Document) -> Result<(), DbError> {
        match self {
            Self::Postgres(store) => store.replace(doc).await,
            Self::Memory(store) => store.replace(doc).await,
        }
    }

    /// Delete a document, returning it if it existed.
    pub async fn delete(&self, model: &str, id: DocumentId) -> Result<Option<Document>, DbError> {
        match self {
            Self::Postgres(store) => store.delete(model, id).await,
            Self::Memory(store) => store.delete(model, id).await,
        }
    }

    /// Apply a batch of writes atomically: either every write lands or
    /// none does.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] if a replace or delete targets a
    /// missing document, or the backend's error. The store is unchanged
    /// after any error.
    pub async fn commit(&self, writes: &[Write]) -> Result<(), DbError> {
        match self {
            Self::Postgres(store) => store.commit(writes).await,
            Self::Memory(store) => store.commit(writes).await,
        }
    }

    /// List every document of a model.
    pub async fn list(&self, model: &str) -> Result<Vec<Document>, DbError> {
        match self {
            Self::Postgres(store) => store.list(model).await,
            Self::Memory(store) => store.list(model).await,
        }
    }
}
