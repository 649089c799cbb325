//! Integration tests for the application lifecycle.
//!
//! Every test binds real listeners on `127.0.0.1` and uses the in-memory
//! database backend, so no external services are needed. HTTP routes are
//! exercised through `tower::ServiceExt` on the application's router.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing
)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use livewire_db::DatabaseLink;
use livewire_models::ConnectionHandle;
use livewire_server::{AppConfig, Application, BuildError, LifecycleErrorKind, LifecyclePhase};
use serde_json::Value;
use tokio::net::TcpListener;
use tower::ServiceExt;

const CONFIG: &str = r"
server:
  shutdown_timeout_ms: 1000
database:
  scheme: memory
schema:
  Album:
    title: string
    photos: { many: Photo }
  Photo:
    url: string
    album: { ref: Album, inverse: photos }
";

fn config() -> AppConfig {
    AppConfig::parse(CONFIG).expect("test config parses")
}

fn app() -> Application {
    Application::new(config(), DatabaseLink::new()).expect("application builds")
}

/// A port that was free a moment ago.
async fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =============================================================================
// start / stop
// =============================================================================

#[tokio::test]
async fn start_then_stop_releases_everything() {
    let app = app();
    assert_eq!(app.phase(), LifecyclePhase::Idle);

    let addr = app.start(0, None).await.expect("start succeeds");
    assert_ne!(addr.port(), 0);
    assert_eq!(app.phase(), LifecyclePhase::Running);
    assert_eq!(app.local_addr().await, Some(addr));
    assert!(app.database().is_connected().await);

    // The database host defaults to the bound address.
    let uri = app.database().uri().await.unwrap();
    assert_eq!(uri.hostname, "127.0.0.1");
    assert_eq!(uri.database, "test");

    app.stop().await.expect("stop succeeds");
    assert_eq!(app.phase(), LifecyclePhase::Idle);
    assert_eq!(app.local_addr().await, None);
    assert!(!app.database().is_connected().await);

    // The port is free again.
    assert!(TcpListener::bind(addr).await.is_ok());
}

#[tokio::test]
async fn start_while_running_fails() {
    let app = app();
    app.start(0, None).await.unwrap();

    let err = app.start(0, None).await.unwrap_err();
    assert_eq!(err.kind(), LifecycleErrorKind::AlreadyRunning);
    assert_eq!(app.phase(), LifecyclePhase::Running);

    app.stop().await.unwrap();
}

#[tokio::test]
async fn stop_while_idle_fails_without_hanging() {
    let app = app();
    let err = app.stop().await.unwrap_err();
    assert_eq!(err.kind(), LifecycleErrorKind::NotRunning);

    app.start(0, None).await.unwrap();
    app.stop().await.unwrap();
    let err = app.stop().await.unwrap_err();
    assert_eq!(err.kind(), LifecycleErrorKind::NotRunning);
}

#[tokio::test]
async fn application_can_restart_after_stop() {
    let app = app();
    let first = app.start(0, None).await.unwrap();
    app.stop().await.unwrap();

    let second = app.start(first.port(), Some("127.0.0.1")).await.unwrap();
    assert_eq!(second, first);
    app.stop().await.unwrap();
}

#[tokio::test]
async fn database_failure_rolls_back_the_bind() {
    let mut config = config();
    config.database.scheme = String::from("carrier-pigeon");
    let app = Application::new(config, DatabaseLink::new()).unwrap();
    let port = free_port().await;

    let err = app.start(port, None).await.unwrap_err();
    assert_eq!(err.kind(), LifecycleErrorKind::DatabaseConnect);
    assert_eq!(app.phase(), LifecyclePhase::Idle);
    assert!(!app.database().is_connected().await);
    assert_eq!(app.local_addr().await, None);

    // The listener was dropped before the error was reported.
    assert!(TcpListener::bind(("127.0.0.1", port)).await.is_ok());
}

#[tokio::test]
async fn bind_failure_leaves_database_untouched() {
    let squatter = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = squatter.local_addr().unwrap().port();

    let app = app();
    let err = app.start(port, None).await.unwrap_err();
    assert_eq!(err.kind(), LifecycleErrorKind::Bind);
    assert_eq!(app.phase(), LifecyclePhase::Idle);
    assert!(!app.database().is_connected().await);
}

#[tokio::test]
async fn disconnect_failure_is_reported_after_the_listener_closes() {
    let app = app();
    let addr = app.start(0, None).await.unwrap();

    // Release the link behind the application's back.
    app.database().disconnect().await.unwrap();

    let err = app.stop().await.unwrap_err();
    assert_eq!(err.kind(), LifecycleErrorKind::DatabaseDisconnect);
    assert_eq!(app.phase(), LifecyclePhase::Idle);
    assert!(TcpListener::bind(addr).await.is_ok());
}

#[tokio::test]
async fn configured_database_hostname_wins() {
    let mut config = config();
    config.database.hostname = Some(String::from("db.internal"));
    config.database.name = String::from("gallery");
    let app = Application::new(config, DatabaseLink::new()).unwrap();

    app.start(0, None).await.unwrap();
    let uri = app.database().uri().await.unwrap();
    assert_eq!(uri.to_string(), "memory://db.internal/gallery");
    app.stop().await.unwrap();
}

#[tokio::test]
async fn phase_changes_are_observable() {
    let app = app();
    let mut phases = app.subscribe_phase();

    app.start(0, None).await.unwrap();
    assert!(phases.has_changed().unwrap());
    assert_eq!(*phases.borrow_and_update(), LifecyclePhase::Running);

    app.stop().await.unwrap();
    assert_eq!(*phases.borrow_and_update(), LifecyclePhase::Idle);
}

// =============================================================================
// Construction and routes
// =============================================================================

#[tokio::test]
async fn invalid_schema_fails_construction() {
    let yaml = "schema:\n  Photo:\n    album: { ref: Album }\n";
    let config = AppConfig::parse(yaml).unwrap();
    let result = Application::new(config, DatabaseLink::new());
    assert!(matches!(result, Err(BuildError::Models(_))));
}

#[tokio::test]
async fn invalid_socket_path_fails_construction() {
    let mut config = config();
    config.socket.path = String::from("socket");
    let result = Application::new(config, DatabaseLink::new());
    assert!(matches!(result, Err(BuildError::Config(_))));
}

#[tokio::test]
async fn route_patterns_in_socket_path_fail_construction() {
    for path in ["/{x", "/live/{id}", "/live/*rest", "/:id", "/health"] {
        let mut config = config();
        config.socket.path = String::from(path);
        let result = Application::new(config, DatabaseLink::new());
        assert!(matches!(result, Err(BuildError::Config(_))), "{path} should be rejected");
    }
}

#[tokio::test]
async fn health_reports_phase_and_models() {
    let app = app();
    let response = app
        .router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["phase"], "idle");
    assert_eq!(json["models"], serde_json::json!(["Album", "Photo"]));
}

#[tokio::test]
async fn setup_hook_extends_the_router() {
    let app = Application::with_setup(config(), DatabaseLink::new(), |router| {
        router.route("/hello", get(|| async { "hello" }))
    })
    .unwrap();

    let response = app
        .router()
        .oneshot(Request::get("/hello").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Base routes survive the hook.
    let response = app
        .router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn on_connect_registers_with_every_model() {
    let app = app();
    let (connection, _close, _frames) = ConnectionHandle::channel();

    let report = app.on_connect(&connection).await;
    assert!(report.is_complete());
    assert_eq!(report.registered, vec!["Album", "Photo"]);
    for handle in app.registry().handles() {
        assert!(handle.is_registered(connection.id()).await);
    }
}
