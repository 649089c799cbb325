//! Livewire binary.
//!
//! Loads the configuration, builds the [`Application`] and serves it until
//! `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `$LIVEWIRE_CONFIG` or `livewire.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Build the application (schema, model registry, router)
//! 4. Bind, connect the database and serve
//! 5. On `Ctrl-C`, close sessions and the listener, then disconnect

mod error;

use std::path::{Path, PathBuf};

use livewire_db::DatabaseLink;
use livewire_server::config::LoggingConfig;
use livewire_server::{AppConfig, Application, run_until_shutdown};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Environment variable naming an alternative configuration file.
const CONFIG_ENV: &str = "LIVEWIRE_CONFIG";

/// Configuration file used when [`CONFIG_ENV`] is unset.
const DEFAULT_CONFIG_PATH: &str = "livewire.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if the configuration is unusable or the application
/// fails to start or stop cleanly.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path(std::env::var(CONFIG_ENV).ok());
    let (config, found) = load_config(&path)?;

    init_logging(&config.logging);
    info!("livewire starting");
    if !found {
        info!(path = %path.display(), "Config file not found, using defaults");
    }
    if config.schema.is_empty() {
        warn!("Schema is empty, no models will be served");
    }
    info!(
        path = %path.display(),
        host = config.server.host,
        port = config.server.port,
        socket_path = config.socket.path,
        database_scheme = config.database.scheme,
        "Configuration loaded"
    );

    let host = config.server.host.clone();
    let port = config.server.port;
    let app = Application::new(config, DatabaseLink::new()).map_err(AppError::from)?;
    info!(models = ?app.registry().model_names(), "Model registry built");

    run_until_shutdown(&app, port, Some(&host)).await.map_err(AppError::from)?;
    info!("livewire stopped");
    Ok(())
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the configured
/// level.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    }
}

fn config_path(from_env: Option<String>) -> PathBuf {
    from_env
        .filter(|p| !p.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load configuration from `path`, reporting whether the file existed.
///
/// A missing file falls back to defaults; `DATABASE_URL` is still honoured
/// in that case.
fn load_config(path: &Path) -> Result<(AppConfig, bool), AppError> {
    if path.exists() {
        return Ok((AppConfig::from_file(path)?, true));
    }
    let mut config = AppConfig::default();
    config.database.apply_env_overrides();
    config.validate()?;
    Ok((config, false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_defaults_to_livewire_yaml() {
        assert_eq!(config_path(None), PathBuf::from("livewire.yaml"));
        assert_eq!(config_path(Some(String::new())), PathBuf::from("livewire.yaml"));
    }

    #[test]
    fn config_path_honours_override() {
        assert_eq!(
            config_path(Some(String::from("/etc/livewire/prod.yaml"))),
            PathBuf::from("/etc/livewire/prod.yaml")
        );
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let loaded = load_config(Path::new("/nonexistent/livewire.yaml"));
        assert!(matches!(loaded, Ok((_, false))));
        let (config, _) = loaded.unwrap_or_default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.socket.path, "/socket");
    }
}
