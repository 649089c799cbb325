//! Run an [`Application`] until the process is asked to stop.

use tracing::{info, warn};

use crate::application::Application;
use crate::error::LifecycleError;

/// Start the application, wait for `Ctrl-C`, then stop it.
///
/// # Errors
///
/// Returns whatever [`Application::start`] or [`Application::stop`]
/// reports.
pub async fn run_until_shutdown(app: &Application, port: u16, hostname: Option<&str>) -> Result<(), LifecycleError> {
    let addr = app.start(port, hostname).await?;
    info!(%addr, socket_path = %app.config().socket.path, "Listening, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
    }

    info!("Shutdown requested");
    app.stop().await
}
