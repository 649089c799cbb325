//! Data layer for the Livewire application core.
//!
//! Documents are stored per model with a `JSONB` body. `PostgreSQL` is the
//! production backend; an in-memory backend serves tests and local runs.
//! The backend is picked from the URI scheme.
//!
//! # Architecture
//!
//! ```text
//! Application lifecycle
//!     |
//!     +-- connect / disconnect --> DatabaseLink (shared slot)
//!                                      |
//! Model registry -- per operation -----+--> Database
//!                                              |-- Postgres (PostgresStore)
//!                                              +-- Memory   (MemoryStore)
//! ```
//!
//! # Modules
//!
//! - [`uri`] -- `scheme://hostname/databaseName` URIs and defaults
//! - [`database`] -- Backend dispatch and connect options
//! - [`link`] -- Explicit connection handle shared by owner and registry
//! - [`postgres`] -- `PostgreSQL` document table operations
//! - [`memory`] -- In-process document storage
//! - [`error`] -- Shared error types

pub mod database;
pub mod error;
pub mod link;
pub mod memory;
pub mod postgres;
pub mod uri;

// Re-export primary types for convenience.
pub use database::{ConnectOptions, Database, Write};
pub use error::DbError;
pub use link::DatabaseLink;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use uri::{DEFAULT_DATABASE, DEFAULT_HOSTNAME, DEFAULT_SCHEME, DatabaseUri};
