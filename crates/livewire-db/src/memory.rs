//! In-process document storage.
//!
//! Selected with the `memory://` scheme. Data lives only as long as the
//! connection: every connect starts from an empty store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use livewire_types::{Document, DocumentId};
use tokio::sync::RwLock;

use crate::database::Write;
use crate::error::DbError;
use crate::uri::DatabaseUri;

type Collections = BTreeMap<String, BTreeMap<DocumentId, Document>>;

/// Handle to an in-memory document store.
///
/// Cheap to clone; clones share the same storage and open flag.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    database: String,
    collections: Arc<RwLock<Collections>>,
    open: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Open a fresh, empty store.
    pub fn connect(uri: &DatabaseUri) -> Self {
        tracing::info!(database = uri.database, "Opened in-memory document store");
        Self {
            database: uri.database.clone(),
            collections: Arc::new(RwLock::new(BTreeMap::new())),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Name of the database this store was opened for.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Whether [`close`](Self::close) has not been called yet.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Close the store. Later operations fail with [`DbError::NotConnected`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotConnected`] if the store was already closed.
    pub fn close(&self) -> Result<(), DbError> {
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::info!(database = self.database, "In-memory document store closed");
            Ok(())
        } else {
            Err(DbError::NotConnected)
        }
    }

    fn ensure_open(&self) -> Result<(), DbError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DbError::NotConnected)
        }
    }

    /// Insert a new document, replacing any document with the same ID.
    pub async fn insert(&self, doc: &Document) -> Result<(), DbError> {
        self.ensure_open()?;
        let mut collections = self.collections.write().await;
        collections
            .entry(doc.model.clone())
            .or_default()
            .insert(doc.id, doc.clone());
        Ok(())
    }

    /// Fetch one document.
    pub async fn get(&self, model: &str, id: DocumentId) -> Result<Option<Document>, DbError> {
        self.ensure_open()?;
        let collections = self.collections.read().await;
        Ok(collections.get(model).and_then(|docs| docs.get(&id)).cloned())
    }

    /// Overwrite an existing document.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] if the document does not exist.
    pub async fn replace(&self, doc: &Document) -> Result<(), DbError> {
        self.ensure_open()?;
        let mut collections = self.collections.write().await;
        let slot = collections
            .get_mut(&doc.model)
            .and_then(|docs| docs.get_mut(&doc.id))
            .ok_or_else(|| DbError::NotFound {
                model: doc.model.clone(),
                id: doc.id,
            })?;
        slot.clone_from(doc);
        Ok(())
    }

    /// Delete a document, returning it if it existed.
    pub async fn delete(&self, model: &str, id: DocumentId) -> Result<Option<Document>, DbError> {
        self.ensure_open()?;
        let mut collections = self.collections.write().await;
        Ok(collections.get_mut(model).and_then(|docs| docs.remove(&id)))
    }

    /// Apply a batch of writes under one lock, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] if a replace or delete targets a
    /// missing document; the store is left untouched.
    pub async fn commit(&self, writes: &[Write]) -> Result<(), DbError> {
        self.ensure_open()?;
        let mut collections = self.collections.write().await;
        let mut next = collections.clone();
        for write in writes {
            apply(&mut next, write)?;
        }
        *collections = next;
        Ok(())
    }

    /// List every document of a model, oldest first.
    pub async fn list(&self, model: &str) -> Result<Vec<Document>, DbError> {
        self.ensure_open()?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(model)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }
}

fn apply(collections: &mut Collections, write: &Write) -> Result<(), DbError> {
    let not_found = || DbError::NotFound {
        model: write.model().to_owned(),
        id: write.id(),
    };
    match write {
        Write::Insert(doc) => {
            collections
                .entry(doc.model.clone())
                .or_default()
                .insert(doc.id, doc.clone());
        }
        Write::Replace(doc) => {
            let slot = collections
                .get_mut(&doc.model)
                .and_then(|docs| docs.get_mut(&doc.id))
                .ok_or_else(not_found)?;
            slot.clone_from(doc);
        }
        Write::Delete { model, id } => {
            collections
                .get_mut(model)
                .and_then(|docs| docs.remove(id))
                .ok_or_else(not_found)?;
        }
    }
    Ok(())
}
