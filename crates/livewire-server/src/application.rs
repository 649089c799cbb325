//! The application object: HTTP server, real-time transport and database
//! link behind one start/stop lifecycle.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --start()--> Starting --bind ok, db ok--> Running --stop()--> Stopping --> Idle
//!                      |
//!                      +-- bind or db failure (listener released) --> Idle
//! ```
//!
//! `start()` binds first and connects the database second; `stop()`
//! closes the server and drains real-time sessions first and disconnects
//! the database second. All transitions are serialized by one async mutex.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use livewire_db::DatabaseLink;
use livewire_models::{ConnectionHandle, ModelRegistry, RegistrationReport};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{BuildError, LifecycleError, ServeError};
use crate::router::build_router;
use crate::state::{AppState, LifecyclePhase};

/// Hostname bound when `start` is not given one.
pub const DEFAULT_HOSTNAME: &str = "127.0.0.1";

/// A serving listener and the means to stop it.
#[derive(Debug)]
struct RunningServer {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl RunningServer {
    /// Ask for a graceful shutdown and wait up to `grace` for it.
    ///
    /// On timeout the serve task is aborted, which drops the listener.
    async fn close(self, grace: Duration) -> Result<(), ServeError> {
        // The receiver is gone if the serve task already ended.
        if self.shutdown.send(()).is_err() {
            warn!(addr = %self.local_addr, "Serve task ended before shutdown was requested");
        }

        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(joined) => Ok(joined??),
            Err(_elapsed) => {
                task.abort();
                let cancelled = task.await.is_err();
                warn!(
                    addr = %self.local_addr,
                    grace_ms = grace.as_millis(),
                    cancelled,
                    "Graceful shutdown timed out, serve task aborted"
                );
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
enum Lifecycle {
    Idle,
    Running(RunningServer),
}

/// The application: one per process run.
pub struct Application {
    config: AppConfig,
    router: Router,
    state: Arc<AppState>,
    database: DatabaseLink,
    lifecycle: Mutex<Lifecycle>,
    phase: watch::Sender<LifecyclePhase>,
}

impl core::fmt::Debug for Application {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Application")
            .field("phase", &self.phase())
            .field("models", &self.state.registry.model_names())
            .finish_non_exhaustive()
    }
}

impl Application {
    /// Build an application with the base router only.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] if the configuration or schema is unusable.
    pub fn new(config: AppConfig, database: DatabaseLink) -> Result<Self, BuildError> {
        Self::with_setup(config, database, |router| router)
    }

    /// Build an application, letting `setup` extend the HTTP router once.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] if the configuration or schema is unusable.
    pub fn with_setup<F>(config: AppConfig, database: DatabaseLink, setup: F) -> Result<Self, BuildError>
    where
        F: FnOnce(Router) -> Router,
    {
        config.validate()?;
        let registry = Arc::new(ModelRegistry::from_schema(
            &config.schema,
            database.clone(),
            &config.models.registry_options(),
        )?);

        let (phase, phase_rx) = watch::channel(LifecyclePhase::Idle);
        let state = Arc::new(AppState::new(registry, config.socket.events.clone(), phase_rx));
        let router = setup(build_router(Arc::clone(&state), &config.socket.path));

        Ok(Self {
            config,
            router,
            state,
            database,
            lifecycle: Mutex::new(Lifecycle::Idle),
            phase,
        })
    }

    /// Bind the listener, connect the database, then serve.
    ///
    /// `hostname` defaults to `127.0.0.1`; port 0 picks an ephemeral port.
    /// Resolves with the bound address once both steps succeeded.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::AlreadyRunning`] unless idle,
    /// [`LifecycleError::Bind`] if the listener cannot be bound in time, or
    /// [`LifecycleError::DatabaseConnect`] if the database cannot be
    /// reached, in which case the listener is released again. The
    /// application is idle after any error.
    pub async fn start(&self, port: u16, hostname: Option<&str>) -> Result<SocketAddr, LifecycleError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(*lifecycle, Lifecycle::Running(_)) {
            return Err(LifecycleError::AlreadyRunning { phase: self.phase() });
        }

        self.phase.send_replace(LifecyclePhase::Starting);
        match self.launch(port, hostname.unwrap_or(DEFAULT_HOSTNAME)).await {
            Ok(server) => {
                let addr = server.local_addr;
                *lifecycle = Lifecycle::Running(server);
                self.phase.send_replace(LifecyclePhase::Running);
                info!(%addr, "Application running");
                Ok(addr)
            }
            Err(e) => {
                self.phase.send_replace(LifecyclePhase::Idle);
                warn!(error = %e, "Application failed to start");
                Err(e)
            }
        }
    }

    async fn launch(&self, port: u16, hostname: &str) -> Result<RunningServer, LifecycleError> {
        let address = format!("{hostname}:{port}");
        let bind_timeout = self.config.server.bind_timeout();
        let bind_error = |source| LifecycleError::Bind {
            address: address.clone(),
            source,
        };

        let listener = tokio::time::timeout(bind_timeout, TcpListener::bind((hostname, port)))
            .await
            .map_err(|_elapsed| {
                bind_error(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("bind did not complete within {}ms", bind_timeout.as_millis()),
                ))
            })?
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        info!(%local_addr, "Listener bound");

        let uri = self.config.database.uri(Some(local_addr.ip()));
        let options = self.config.database.connect_options();
        if let Err(source) = self.database.connect(&uri, &options).await {
            drop(listener);
            return Err(LifecycleError::DatabaseConnect {
                uri: uri.to_string(),
                source,
            });
        }
        info!(%uri, "Database connected");

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let router = self.router.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.await.ok();
                })
                .await
        });

        Ok(RunningServer {
            local_addr,
            shutdown,
            task,
        })
    }

    /// Close real-time sessions and the listener, then disconnect the
    /// database.
    ///
    /// Live WebSocket sessions are told to close and are awaited (bounded
    /// by the shutdown timeout) before the database is released; each one
    /// is unregistered from every model on its way out.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::NotRunning`] when idle,
    /// [`LifecycleError::Close`] if the server failed, or
    /// [`LifecycleError::DatabaseDisconnect`]. The application is idle
    /// after any outcome.
    ///
    /// After [`LifecycleError::Close`] the database is left connected, so
    /// every later [`start`](Self::start) fails with
    /// [`LifecycleError::DatabaseConnect`] until the link is released
    /// through [`database`](Self::database)`.disconnect()`.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Lifecycle::Running(server) = core::mem::replace(&mut *lifecycle, Lifecycle::Idle) else {
            return Err(LifecycleError::NotRunning);
        };

        self.phase.send_replace(LifecyclePhase::Stopping);
        self.state.sessions.close_all();

        let grace = self.config.server.shutdown_timeout();
        let addr = server.local_addr;
        let closed = server.close(grace).await;
        if !self.state.sessions.drained(grace).await {
            warn!(
                live = self.state.sessions.live(),
                grace_ms = grace.as_millis(),
                "WebSocket sessions still open after shutdown grace period"
            );
        }

        let result = match closed {
            Err(source) => Err(LifecycleError::Close { source }),
            Ok(()) => {
                info!(%addr, "Server closed");
                match self.database.disconnect().await {
                    Ok(uri) => {
                        info!(%uri, "Database disconnected");
                        Ok(())
                    }
                    Err(source) => Err(LifecycleError::DatabaseDisconnect { source }),
                }
            }
        };

        self.phase.send_replace(LifecyclePhase::Idle);
        match &result {
            Ok(()) => info!("Application stopped"),
            Err(e) => warn!(error = %e, "Application stopped with errors"),
        }
        result
    }

    /// Register a newly established real-time connection with every model.
    pub async fn on_connect(&self, connection: &ConnectionHandle) -> RegistrationReport {
        self.state.on_connect(connection).await
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.borrow()
    }

    /// Watch lifecycle phase changes.
    pub fn subscribe_phase(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.subscribe()
    }

    /// The bound address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lifecycle.lock().await {
            Lifecycle::Running(server) => Some(server.local_addr),
            Lifecycle::Idle => None,
        }
    }

    /// WebSocket sessions currently being served.
    pub fn live_sessions(&self) -> usize {
        self.state.sessions.live()
    }

    /// The model registry.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.state.registry
    }

    /// The database link, shared with the registry.
    pub const fn database(&self) -> &DatabaseLink {
        &self.database
    }

    /// The configuration the application was built with.
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// A clone of the HTTP router, setup hook applied.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}
