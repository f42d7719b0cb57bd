//! Session integration tests against an in-process mock guider server

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use nocturne_guider::{AppState, GuiderClient, GuiderConfig, GuiderNotification};

/// Minimal guider server: greets every connection with Version and
/// AppState events, then answers requests with canned responses.
struct MockServer {
    port: u16,
    connections: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl MockServer {
    async fn start() -> Self {
        Self::start_on(0).await
    }

    /// Bind a specific port, for tests that restart the server in place
    async fn start_on(port: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let connections_clone = connections.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let handle = tokio::spawn(handle_connection(stream));
                connections_clone.lock().await.push(handle);
            }
        });
        Self {
            port,
            connections,
            accept_task,
        }
    }

    /// Drop every open connection, like a server crash
    async fn shutdown(&self) {
        self.accept_task.abort();
        for connection in self.connections.lock().await.drain(..) {
            connection.abort();
        }
    }
}

async fn handle_connection(stream: TcpStream) {
    let (read, mut write) = stream.into_split();

    let greeting = concat!(
        "{\"Event\":\"Version\",\"PHDVersion\":\"2.6.13-mock\",\"PHDSubver\":\"\",\"MsgVersion\":1}\r\n",
        "{\"Event\":\"AppState\",\"State\":\"Looping\"}\r\n",
    );
    if write.write_all(greeting.as_bytes()).await.is_err() {
        return;
    }

    let mut reader = BufReader::new(read);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let request: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let response = serde_json::json!({
            "id": request["id"],
            "result": respond(request["method"].as_str().unwrap_or("")),
        });
        if write
            .write_all(format!("{}\r\n", response).as_bytes())
            .await
            .is_err()
        {
            return;
        }
    }
}

fn respond(method: &str) -> serde_json::Value {
    match method {
        "get_app_state" => serde_json::json!("Looping"),
        "get_connected" => serde_json::json!(true),
        "get_profiles" => serde_json::json!([{"id": 1, "name": "Mock Profile"}]),
        "get_profile" => serde_json::json!({"id": 1, "name": "Mock Profile"}),
        "get_pixel_scale" => serde_json::json!(1.31),
        "get_exposure" => serde_json::json!(1000),
        "get_camera_frame_size" => serde_json::json!([640, 480]),
        "get_calibrated" => serde_json::json!(false),
        "get_lock_position" => serde_json::json!([320.0, 240.0]),
        "get_lock_shift_params" => serde_json::json!({
            "enabled": false,
            "rate": [0.0, 0.0],
            "units": "arcsec/hr",
            "axes": "RA/Dec",
        }),
        _ => serde_json::json!(0),
    }
}

fn client_for(port: u16) -> GuiderClient {
    GuiderClient::new(GuiderConfig {
        host: "127.0.0.1".to_string(),
        port,
        connection_timeout_seconds: 2,
        ..Default::default()
    })
}

/// Poll `check` until it returns true or five seconds pass
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_connect_initializes_session() {
    let server = MockServer::start().await;
    let client = client_for(server.port);

    client.connect().await.unwrap();

    assert!(client.is_connected().await);
    assert!(client.is_initialized().await);
    assert_eq!(client.pixel_scale().await, 1.31);

    // The greeting events arrive on the listener asynchronously.
    eventually(|| async {
        client.server_version().await.as_deref() == Some("2.6.13-mock")
    })
    .await;
    eventually(|| async { client.app_state().await == Some(AppState::Looping) }).await;

    let position = client.get_lock_position().await.unwrap();
    assert_eq!(position, Some((320.0, 240.0)));

    client.disconnect().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_connect_fails_without_server() {
    // Bind and drop a listener to get a dead port.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = client_for(port);
    assert!(client.connect().await.is_err());
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_connection_loss_resets_state_and_notifies_once() {
    let server = MockServer::start().await;
    let client = client_for(server.port);
    client.connect().await.unwrap();
    let mut notifications = client.subscribe();

    server.shutdown().await;

    let notification = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(notification, GuiderNotification::ConnectionLost));

    assert!(!client.is_connected().await);
    assert!(!client.is_initialized().await);
    assert!(client.app_state().await.is_none());
    assert_eq!(client.pixel_scale().await, 0.0);

    // Exactly one connection-lost notification.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(matches!(
        notifications.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn test_reconnect_after_connection_loss_and_disconnect() {
    let server = MockServer::start().await;
    let port = server.port;
    let client = client_for(port);
    client.connect().await.unwrap();
    let mut notifications = client.subscribe();

    server.shutdown().await;
    let notification = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(notification, GuiderNotification::ConnectionLost));

    // Cleanup after the loss, the way a session controller would.
    client.disconnect().await.unwrap();

    // Server comes back on the same port; the new session must stay up.
    let server = MockServer::start_on(port).await;
    client.connect().await.unwrap();
    assert!(client.is_connected().await);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(client.is_connected().await);
    assert!(matches!(
        notifications.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));

    client.disconnect().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_dither_refused_while_looping() {
    let server = MockServer::start().await;
    let client = client_for(server.port);
    client.connect().await.unwrap();
    eventually(|| async { client.app_state().await == Some(AppState::Looping) }).await;

    let mut notifications = client.subscribe();
    assert!(!client.dither().await.unwrap());
    match tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .unwrap()
        .unwrap()
    {
        GuiderNotification::Warning(message) => assert!(message.contains("not guiding")),
        other => panic!("Expected warning, got {:?}", other),
    }

    client.disconnect().await.unwrap();
    server.shutdown().await;
}
