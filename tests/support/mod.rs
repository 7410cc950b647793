// Shared primitives for starting sync servers across integration tests.
#![allow(dead_code)]

use std::{
    // `Arc` shares the publish slot with the server thread; `OnceLock` writes it once.
    sync::{Arc, OnceLock},
    time::Duration,
};

use futures::{Stream, StreamExt};
use sync_server::ServerSettings;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Addresses a running test server publishes once both listeners are bound.
#[derive(Debug, Clone)]
pub struct TestServer {
    pub ws_url: String,
    pub tcp_addr: String,
}

// One shared server per test binary for tests that do not need custom settings.
static SHARED: OnceLock<TestServer> = OnceLock::new();

/// Settings for tests: no timed shutdown and no frame budget.
pub fn test_settings() -> ServerSettings {
    ServerSettings {
        demo_shutdown_after: None,
        tick_budget: None,
        ..ServerSettings::default()
    }
}

// Ensure the shared test server is running and return its addresses.
pub fn ensure_server() -> &'static TestServer {
    SHARED.get_or_init(|| spawn_server(test_settings()))
}

// Start a dedicated server with custom settings.
pub fn spawn_server(settings: ServerSettings) -> TestServer {
    let published = Arc::new(OnceLock::<TestServer>::new());
    let published_thread = Arc::clone(&published);

    // Spawn an OS thread so the server outlives individual `#[tokio::test]` runtimes.
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().expect("test runtime");
        runtime.block_on(async move {
            // Ephemeral ports avoid collisions with local services and other test servers.
            let web = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind ephemeral websocket port");
            let tcp = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind ephemeral tcp port");

            let web_addr = web.local_addr().expect("get websocket addr");
            let tcp_addr = tcp.local_addr().expect("get tcp addr");
            let _ = published_thread.set(TestServer {
                ws_url: format!("ws://{web_addr}/"),
                tcp_addr: tcp_addr.to_string(),
            });

            sync_server::run(web, tcp, settings)
                .await
                .expect("server failed");
        });
    });

    wait_for_readiness(published)
}

// Wait for the addresses to be published and then for the websocket port to accept.
fn wait_for_readiness(published: Arc<OnceLock<TestServer>>) -> TestServer {
    let server = loop {
        if let Some(server) = published.get() {
            break server.clone();
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let web_addr = server
        .ws_url
        .strip_prefix("ws://")
        .and_then(|rest| rest.strip_suffix('/'))
        .expect("websocket url should be ws://host:port/");

    for _ in 0..100 {
        if std::net::TcpStream::connect(web_addr).is_ok() {
            return server;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    panic!("server did not become ready in time");
}

/// Reads websocket messages until the next JSON state frame arrives.
pub async fn next_state<S>(ws: &mut S) -> serde_json::Value
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("state frame should arrive in time")
            .expect("stream should stay open")
            .expect("frame should be valid");

        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("state frame should be json");
        }
    }
}

/// Reads state frames until `paused` matches `expected` or the attempts run out.
pub async fn wait_for_paused<S>(ws: &mut S, expected: bool) -> serde_json::Value
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    for _ in 0..200 {
        let state = next_state(ws).await;
        if state["paused"] == serde_json::Value::Bool(expected) {
            return state;
        }
    }
    panic!("paused never became {expected}");
}
