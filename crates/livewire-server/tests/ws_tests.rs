//! End-to-end tests for the WebSocket transport.
//!
//! Each test starts a real application on an ephemeral port with the
//! in-memory database backend and talks to it with a `tokio-tungstenite`
//! client.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::panic
)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use livewire_db::DatabaseLink;
use livewire_server::{AppConfig, Application};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONFIG: &str = r"
server:
  shutdown_timeout_ms: 1000
database:
  scheme: memory
socket:
  path: /socket
schema:
  Album:
    title: string
    photos: { many: Photo }
  Photo:
    url: string
    album: { ref: Album, inverse: photos }
";

const WAIT: Duration = Duration::from_secs(5);

async fn running_app() -> (Application, SocketAddr) {
    let config = AppConfig::parse(CONFIG).unwrap();
    let app = Application::new(config, DatabaseLink::new()).unwrap();
    let addr = app.start(0, None).await.unwrap();
    (app, addr)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _response) = connect_async(format!("ws://{addr}/socket")).await.expect("handshake succeeds");
    client
}

/// Next text frame, parsed as JSON. Control frames are skipped.
async fn next_json(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(WAIT, client.next())
            .await
            .expect("frame within timeout")
            .expect("stream still open")
            .expect("frame decodes");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Poll until every model handle has released its connections.
async fn wait_for_no_connections(app: &Application) {
    tokio::time::timeout(WAIT, async {
        loop {
            if registered_connections(app).await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connections released");
}

#[tokio::test]
async fn first_frame_reports_registration() {
    let (app, addr) = running_app().await;
    let mut client = connect(addr).await;

    let frame = next_json(&mut client).await;
    assert_eq!(frame["event"], "registered");
    assert_eq!(frame["payload"]["models"], json!(["Album", "Photo"]));
    assert_eq!(frame["payload"]["failures"], json!([]));
    assert!(frame["payload"]["connection"].is_string());

    app.stop().await.unwrap();
}

#[tokio::test]
async fn changes_are_pushed_to_connected_clients() {
    let (app, addr) = running_app().await;
    let mut client = connect(addr).await;
    next_json(&mut client).await;

    let outcome = app.registry().create("Album", json!({ "title": "Summer" })).await.unwrap();
    assert_eq!(outcome.report.delivered, 1);

    let frame = next_json(&mut client).await;
    assert_eq!(frame["event"], "Album:create");
    assert_eq!(frame["payload"]["document"]["body"]["title"], "Summer");
    assert_eq!(frame["payload"]["document"]["id"], json!(outcome.document.id));

    app.stop().await.unwrap();
}

#[tokio::test]
async fn each_client_receives_its_own_copy() {
    let (app, addr) = running_app().await;
    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    next_json(&mut first).await;
    next_json(&mut second).await;

    let outcome = app.registry().create("Album", json!({ "title": "Shared" })).await.unwrap();
    assert_eq!(outcome.report.delivered, 2);

    assert_eq!(next_json(&mut first).await["event"], "Album:create");
    assert_eq!(next_json(&mut second).await["event"], "Album:create");

    app.stop().await.unwrap();
}

#[tokio::test]
async fn ping_is_answered() {
    let (app, addr) = running_app().await;
    let mut client = connect(addr).await;
    next_json(&mut client).await;

    client.send(Message::Ping(vec![7, 7, 7].into())).await.unwrap();
    let pong = tokio::time::timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Pong(data))) => return data,
                Some(Ok(_)) => {}
                other => panic!("connection ended before pong: {other:?}"),
            }
        }
    })
    .await
    .expect("pong within timeout");
    assert_eq!(pong.as_ref(), &[7, 7, 7]);

    app.stop().await.unwrap();
}

#[tokio::test]
async fn client_close_unregisters_the_connection() {
    let (app, addr) = running_app().await;
    let mut client = connect(addr).await;
    next_json(&mut client).await;

    for handle in app.registry().handles() {
        assert_eq!(handle.connection_count().await, 1);
    }

    client.close(None).await.unwrap();
    wait_for_no_connections(&app).await;

    app.stop().await.unwrap();
}

#[tokio::test]
async fn stop_closes_live_sessions() {
    let (app, addr) = running_app().await;
    let mut client = connect(addr).await;
    next_json(&mut client).await;

    app.stop().await.unwrap();

    let ended = tokio::time::timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "session should end after stop");
    wait_for_no_connections(&app).await;
}

async fn registered_connections(app: &Application) -> usize {
    let mut total = 0usize;
    for handle in app.registry().handles() {
        total = total.saturating_add(handle.connection_count().await);
    }
    total
}

async fn wait_for_end(client: &mut Client) -> bool {
    tokio::time::timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await
    .is_ok()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_releases_every_session_before_returning() {
    const CLIENTS: usize = 20;
    let config = AppConfig::parse(CONFIG).unwrap();
    let app = Application::new(config, DatabaseLink::new()).unwrap();

    for round in 0..5 {
        let addr = app.start(0, None).await.unwrap();
        let mut clients = futures::future::join_all((0..CLIENTS).map(|_| connect(addr))).await;
        for client in &mut clients {
            assert_eq!(next_json(client).await["event"], "registered");
        }
        assert_eq!(app.live_sessions(), CLIENTS);

        app.stop().await.unwrap();

        assert_eq!(app.live_sessions(), 0, "round {round}: sessions outlived stop");
        assert_eq!(registered_connections(&app).await, 0, "round {round}: registrations outlived stop");
        for client in &mut clients {
            assert!(wait_for_end(client).await, "round {round}: client left open");
        }
    }

    // Nothing from earlier rounds receives changes after a restart.
    app.start(0, None).await.unwrap();
    let outcome = app.registry().create("Album", json!({ "title": "After" })).await.unwrap();
    assert_eq!(outcome.report.delivered, 0);
    app.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connections_racing_stop_never_stay_registered() {
    let config = AppConfig::parse(CONFIG).unwrap();
    let app = Application::new(config, DatabaseLink::new()).unwrap();

    for _ in 0..5 {
        let addr = app.start(0, None).await.unwrap();
        let dialers: Vec<_> = (0..10)
            .map(|_| tokio::spawn(connect_async(format!("ws://{addr}/socket"))))
            .collect();
        app.stop().await.unwrap();

        for dialer in dialers {
            if let Ok((mut client, _)) = dialer.await.unwrap() {
                assert!(wait_for_end(&mut client).await, "late client left open");
            }
        }
        // Sessions accepted after stop close themselves without registering.
        tokio::time::timeout(WAIT, async {
            while app.live_sessions() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("late sessions finish");
        assert_eq!(registered_connections(&app).await, 0);
    }
}
