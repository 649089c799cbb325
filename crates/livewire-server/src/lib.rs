//! Application lifecycle for the Livewire application core.
//!
//! This crate wires the HTTP server, the WebSocket transport and the
//! database link together behind [`Application`]:
//!
//! - **`start(port, hostname)`** binds the listener, connects the database
//!   and begins serving, rolling the bind back if the database is
//!   unreachable
//! - **`stop()`** closes live sessions and the listener, then disconnects
//!   the database
//! - **`on_connect(connection)`** registers a real-time connection with
//!   every model in the registry
//!
//! # Architecture
//!
//! ```text
//! Application --- Router (/health, /socket, setup hook routes)
//!     |                         |
//!     |                         +-- ws session --> on_connect --> ModelRegistry
//!     |
//!     +-- DatabaseLink (connect on start, disconnect on stop)
//! ```

pub mod application;
pub mod config;
pub mod error;
pub mod router;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use application::Application;
pub use config::{AppConfig, ConfigError};
pub use error::{BuildError, LifecycleError, LifecycleErrorKind, ServeError};
pub use router::build_router;
pub use startup::run_until_shutdown;
pub use state::{AppState, LifecyclePhase};
