//! Explicit, shareable database connection handle.
//!
//! A [`DatabaseLink`] starts disconnected. The application lifecycle owns
//! it and drives [`connect`](DatabaseLink::connect) and
//! [`disconnect`](DatabaseLink::disconnect); the model registry holds a
//! clone and resolves the live [`Database`] per operation. Clones share
//! the same slot, so there is exactly one connection per link.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::database::{ConnectOptions, Database};
use crate::error::DbError;
use crate::uri::DatabaseUri;

#[derive(Debug)]
struct Connected {
    uri: DatabaseUri,
    database: Database,
}

/// Shared slot holding the current database connection, if any.
#[derive(Debug, Clone, Default)]
pub struct DatabaseLink {
    slot: Arc<RwLock<Option<Connected>>>,
}

impl DatabaseLink {
    /// Create a disconnected link.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection and store it in the link.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::AlreadyConnected`] if the link is already in
    /// use, or whatever [`Database::connect`] reports.
    pub async fn connect(&self, uri: &DatabaseUri, options: &ConnectOptions) -> Result<(), DbError> {
        if let Some(current) = self.slot.read().await.as_ref() {
            return Err(DbError::AlreadyConnected(current.uri.to_string()));
        }

        let database = Database::connect(uri, options).await?;

        let mut slot = self.slot.write().await;
        if let Some(current) = slot.as_ref() {
            // Lost a race with a concurrent connect; keep the winner.
            let winner = current.uri.to_string();
            drop(slot);
            if let Err(e) = database.disconnect().await {
                tracing::warn!(error = %e, "Failed to release redundant database connection");
            }
            return Err(DbError::AlreadyConnected(winner));
        }
        tracing::debug!(uri = %uri, backend = database.backend(), "Database link connected");
        *slot = Some(Connected {
            uri: uri.clone(),
            database,
        });
        Ok(())
    }

    /// Release the connection.
    ///
    /// The link is emptied even when the backend reports a failure, so a
    /// later [`connect`](Self::connect) can start over.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotConnected`] if the link is empty, or the
    /// backend's disconnect error.
    pub async fn disconnect(&self) -> Result<DatabaseUri, DbError> {
        let connected = self.slot.write().await.take().ok_or(DbError::NotConnected)?;
        connected.database.disconnect().await?;
        tracing::debug!(uri = %connected.uri, "Database link disconnected");
        Ok(connected.uri)
    }

    /// The live database, for issuing operations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotConnected`] if the link is empty.
    pub async fn database(&self) -> Result<Database, DbError> {
        self.slot
            .read()
            .await
            .as_ref()
            .map(|c| c.database.clone())
            .ok_or(DbError::NotConnected)
    }

    /// URI of the current connection, if any.
    pub async fn uri(&self) -> Option<DatabaseUri> {
        self.slot.read().await.as_ref().map(|c| c.uri.clone())
    }

    /// Whether a connection is currently held.
    pub async fn is_connected(&self) -> bool {
        self.slot.read().await.is_some()
    }
}
