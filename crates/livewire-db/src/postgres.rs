//! `PostgreSQL` document storage.
//!
//! Documents live in a single `documents` table with the body kept as
//! `JSONB`, which gives the registry schemaless per-model storage on top
//! of a relational server.
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! to avoid requiring a live database at build time. All queries are
//! parameterized to prevent SQL injection.

use chrono::{DateTime, Utc};
use livewire_types::{Document, DocumentId};
use sqlx::{PgExecutor, PgPool};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use uuid::Uuid;

use crate::database::{ConnectOptions, Write};
use crate::error::DbError;
use crate::uri::DatabaseUri;

/// A row of the `documents` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    model: String,
    body: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Self {
            id: DocumentId(row.id),
            model: row.model,
            body: row.body,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Connection pool handle to `PostgreSQL`.
///
/// Cheap to clone; clones share the same [`PgPool`].
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to `PostgreSQL` and run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidUri`] if the URI cannot be parsed,
    /// [`DbError::Postgres`] if the connection fails, or
    /// [`DbError::Migration`] if the schema cannot be created.
    pub async fn connect(uri: &DatabaseUri, options: &ConnectOptions) -> Result<Self, DbError> {
        let mut connect_options: PgConnectOptions = uri
            .to_string()
            .parse()
            .map_err(|e: sqlx::Error| DbError::InvalidUri(format!("{uri}: {e}")))?;
        if let Some(username) = &options.username {
            connect_options = connect_options.username(username);
        }
        if let Some(password) = &options.password {
            connect_options = connect_options.password(password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.connect_timeout)
            .idle_timeout(options.idle_timeout)
            .connect_with(connect_options)
            .await?;

        if options.run_migrations {
            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::debug!("Document migrations applied");
        }

        tracing::info!(
            max_connections = options.max_connections,
            database = uri.database,
            "Connected to PostgreSQL"
        );

        Ok(Self { pool })
    }

    /// Return a reference to the underlying [`PgPool`].
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close all connections in the pool gracefully.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotConnected`] if the pool was already closed.
    pub async fn close(&self) -> Result<(), DbError> {
        if self.pool.is_closed() {
            return Err(DbError::NotConnected);
        }
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
        Ok(())
    }

    /// Insert a new document.
    pub async fn insert(&self, doc: &Document) -> Result<(), DbError> {
        insert_row(&self.pool, doc).await
    }

    /// Fetch one document.
    pub async fn get(&self, model: &str, id: DocumentId) -> Result<Option<Document>, DbError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r"SELECT id, model, body, created_at, updated_at
              FROM documents
              WHERE model = $1 AND id = $2",
        )
        .bind(model)
        .bind(id.into_inner())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Document::from))
    }

    /// Overwrite the body of an existing document.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] if no row matched.
    pub async fn replace(&self, doc: &Document) -> Result<(), DbError> {
        replace_row(&self.pool, doc).await
    }

    /// Apply a batch of writes in one transaction.
    ///
    /// The transaction rolls back when it is dropped uncommitted, so any
    /// failing write leaves the table as it was.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] if a replace or delete matched no
    /// row, or [`DbError::Postgres`] if a statement or the commit fails.
    pub async fn commit(&self, writes: &[Write]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for write in writes {
            match write {
                Write::Insert(doc) => insert_row(&mut *tx, doc).await?,
                Write::Replace(doc) => replace_row(&mut *tx, doc).await?,
                Write::Delete { model, id } => {
                    let result = sqlx::query(r"DELETE FROM documents WHERE model = $1 AND id = $2")
                        .bind(model)
                        .bind(id.into_inner())
                        .execute(&mut *tx)
                        .await?;
                    if result.rows_affected() == 0 {
                        return Err(DbError::NotFound {
                            model: model.clone(),
                            id: *id,
                        });
                    }
                }
            }
        }
        tx.commit().await?;
        tracing::debug!(writes = writes.len(), "Document batch committed");
        Ok(())
    }

    /// Delete a document, returning it if it existed.
    pub async fn delete(&self, model: &str, id: DocumentId) -> Result<Option<Document>, DbError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r"DELETE FROM documents
              WHERE model = $1 AND id = $2
              RETURNING id, model, body, created_at, updated_at",
        )
        .bind(model)
        .bind(id.into_inner())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Document::from))
    }

    /// List every document of a model, oldest first.
    pub async fn list(&self, model: &str) -> Result<Vec<Document>, DbError> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r"SELECT id, model, body, created_at, updated_at
              FROM documents
              WHERE model = $1
              ORDER BY id",
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Document::from).collect())
    }
}

async fn insert_row<'e, E>(executor: E, doc: &Document) -> Result<(), DbError>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r"INSERT INTO documents (id, model, body, created_at, updated_at)
          VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(doc.id.into_inner())
    .bind(&doc.model)
    .bind(&doc.body)
    .bind(doc.created_at)
    .bind(doc.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn replace_row<'e, E>(executor: E, doc: &Document) -> Result<(), DbError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        r"UPDATE documents
          SET body = $3, updated_at = $4
          WHERE model = $1 AND id = $2",
    )
    .bind(&doc.model)
    .bind(doc.id.into_inner())
    .bind(&doc.body)
    .bind(doc.updated_at)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound {
            model: doc.model.clone(),
            id: doc.id,
        });
    }
    Ok(())
}
