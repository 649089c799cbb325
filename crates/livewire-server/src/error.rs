//! Error types for the application lifecycle.
//!
//! Every [`LifecycleError`] variant carries its underlying cause; callers
//! that only care about the category match on [`LifecycleError::kind`].

use livewire_db::DbError;
use livewire_models::ModelError;

use crate::config::ConfigError;
use crate::state::LifecyclePhase;

/// Category of a [`LifecycleError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleErrorKind {
    /// The listener could not be bound.
    Bind,
    /// The database connection could not be opened.
    DatabaseConnect,
    /// The server did not shut down cleanly.
    Close,
    /// The database connection could not be released.
    DatabaseDisconnect,
    /// `stop()` was called on an idle application.
    NotRunning,
    /// `start()` was called on an application that is not idle.
    AlreadyRunning,
}

/// Why the serve task ended badly.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// The server reported an I/O failure.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serve task panicked or was cancelled.
    #[error("serve task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors from [`Application::start`](crate::Application::start) and
/// [`Application::stop`](crate::Application::stop).
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Binding the listener failed or timed out.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// The `host:port` that was requested.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Connecting the database failed. The listener has been released.
    #[error("failed to connect database at {uri}: {source}")]
    DatabaseConnect {
        /// The URI that was attempted.
        uri: String,
        /// The underlying database error.
        #[source]
        source: DbError,
    },

    /// The server did not close cleanly. The database is still connected
    /// and must be disconnected before the application can start again.
    #[error("failed to close server: {source}")]
    Close {
        /// What went wrong in the serve task.
        #[source]
        source: ServeError,
    },

    /// Disconnecting the database failed. The listener has been released.
    #[error("failed to disconnect database: {source}")]
    DatabaseDisconnect {
        /// The underlying database error.
        #[source]
        source: DbError,
    },

    /// The application is not running.
    #[error("application is not running")]
    NotRunning,

    /// The application is already starting, running or stopping.
    #[error("application is already {phase}")]
    AlreadyRunning {
        /// The phase at the time of the call.
        phase: LifecyclePhase,
    },
}

impl LifecycleError {
    /// The error's category.
    pub const fn kind(&self) -> LifecycleErrorKind {
        match self {
            Self::Bind { .. } => LifecycleErrorKind::Bind,
            Self::DatabaseConnect { .. } => LifecycleErrorKind::DatabaseConnect,
            Self::Close { .. } => LifecycleErrorKind::Close,
            Self::DatabaseDisconnect { .. } => LifecycleErrorKind::DatabaseDisconnect,
            Self::NotRunning => LifecycleErrorKind::NotRunning,
            Self::AlreadyRunning { .. } => LifecycleErrorKind::AlreadyRunning,
        }
    }
}

/// Errors from constructing an [`Application`](crate::Application).
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The schema could not be turned into a registry.
    #[error(transparent)]
    Models(#[from] ModelError),
}
