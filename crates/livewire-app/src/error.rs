//! Error types for the Livewire binary.

/// Top-level error for the Livewire binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: livewire_server::ConfigError,
    },

    /// The application could not be assembled from its configuration.
    #[error("build error: {source}")]
    Build {
        /// The underlying build error.
        #[from]
        source: livewire_server::BuildError,
    },

    /// Starting or stopping the application failed.
    #[error("lifecycle error: {source}")]
    Lifecycle {
        /// The underlying lifecycle error.
        #[from]
        source: livewire_server::LifecycleError,
    },
}
