//! Shared state for the router and the WebSocket transport.

use std::sync::Arc;
use std::time::Duration;

use livewire_models::{ConnectionHandle, EventFilter, ModelRegistry, RegistrationReport};
use serde::Serialize;
use tokio::sync::watch;

/// Where the application is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    /// Not serving; `start()` is allowed.
    Idle,
    /// Binding the listener and connecting the database.
    Starting,
    /// Serving requests and real-time connections.
    Running,
    /// Closing sessions, the listener and the database.
    Stopping,
}

impl LifecyclePhase {
    /// The lowercase name used in logs and on `/health`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl core::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live WebSocket sessions and the signal that ends them.
///
/// Every `stop()` bumps a shutdown generation that is never reset, so a
/// session that wakes late still sees that a shutdown happened after it
/// opened, however far the lifecycle has moved on since.
#[derive(Debug)]
pub struct Sessions {
    generation: watch::Sender<u64>,
    live: watch::Sender<usize>,
}

impl Sessions {
    /// No sessions, no shutdown yet.
    pub fn new() -> Self {
        Self {
            generation: watch::Sender::new(0),
            live: watch::Sender::new(0),
        }
    }

    /// Count a new session. It ends when the returned ticket is dropped.
    pub fn open(&self) -> SessionTicket<'_> {
        self.live.send_modify(|n| *n = n.saturating_add(1));
        let mut shutdowns = self.generation.subscribe();
        let opened_in = *shutdowns.borrow_and_update();
        SessionTicket {
            live: &self.live,
            shutdowns,
            opened_in,
        }
    }

    /// Ask every open session to close.
    pub fn close_all(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// Sessions still running.
    pub fn live(&self) -> usize {
        *self.live.borrow()
    }

    /// Wait up to `grace` for every session to end. Returns whether they
    /// all did.
    pub async fn drained(&self, grace: Duration) -> bool {
        let mut live = self.live.subscribe();
        tokio::time::timeout(grace, async { live.wait_for(|n| *n == 0).await.is_ok() })
            .await
            .unwrap_or(false)
    }
}

impl Default for Sessions {
    fn default() -> Self {
        Self::new()
    }
}

/// One counted session; see [`Sessions::open`].
#[derive(Debug)]
pub struct SessionTicket<'a> {
    live: &'a watch::Sender<usize>,
    shutdowns: watch::Receiver<u64>,
    opened_in: u64,
}

impl SessionTicket<'_> {
    /// Resolve once a shutdown was requested after this session opened.
    pub async fn shutdown(&mut self) {
        let opened_in = self.opened_in;
        // A dropped sender means the state is gone; treat it as shutdown.
        let _ = self.shutdowns.wait_for(|g| *g != opened_in).await;
    }
}

impl Drop for SessionTicket<'_> {
    fn drop(&mut self) {
        self.live.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// State shared by every request handler.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Debug)]
pub struct AppState {
    /// The model registry every connection registers with.
    pub registry: Arc<ModelRegistry>,
    /// Per-model filters from `socket.events`.
    pub events: Option<EventFilter>,
    /// Lifecycle phase, published by the application.
    pub phase: watch::Receiver<LifecyclePhase>,
    /// Live WebSocket sessions.
    pub sessions: Sessions,
}

impl AppState {
    /// Create the shared state.
    pub fn new(
        registry: Arc<ModelRegistry>,
        events: Option<EventFilter>,
        phase: watch::Receiver<LifecyclePhase>,
    ) -> Self {
        Self {
            registry,
            events,
            phase,
            sessions: Sessions::new(),
        }
    }

    /// Whether new real-time sessions are accepted.
    pub fn accepts_sessions(&self) -> bool {
        matches!(self.phase(), LifecyclePhase::Starting | LifecyclePhase::Running)
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.borrow()
    }

    /// Register a freshly established connection with every model.
    ///
    /// Failures are logged and collected; they never abort the other
    /// registrations.
    pub async fn on_connect(&self, connection: &ConnectionHandle) -> RegistrationReport {
        let report = self
            .registry
            .register_all(connection, self.events.as_ref())
            .await;
        tracing::info!(
            connection_id = %connection.id(),
            registered = report.registered.len(),
            failures = report.failures.len(),
            "Connection registered with models"
        );
        report
    }
}
