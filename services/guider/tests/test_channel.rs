//! Request channel integration tests over real TCP sockets

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use nocturne_guider::channel::RequestChannel;
use nocturne_guider::io::TcpConnectionFactory;
use nocturne_guider::wire::SYNTHETIC_ERROR_CODE;

fn channel_for(addr: std::net::SocketAddr) -> RequestChannel {
    let endpoint = Arc::new(RwLock::new(Some(addr.to_string())));
    RequestChannel::new(
        endpoint,
        Arc::new(TcpConnectionFactory::new()),
        Duration::from_secs(2),
    )
}

#[tokio::test]
async fn test_round_trip_skips_events_and_foreign_responses() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let request: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(request["method"], "get_app_state");
        let id = request["id"].as_str().unwrap();

        // Noise before the real response: an event and a response for a
        // different request.
        let lines = format!(
            "{}\r\n{}\r\n{{\"id\":\"{}\",\"result\":\"Guiding\"}}\r\n",
            r#"{"Event":"AppState","State":"Guiding"}"#,
            r#"{"id":"other","result":0}"#,
            id
        );
        write.write_all(lines.as_bytes()).await.unwrap();
    });

    let channel = channel_for(addr);
    let response = channel
        .send("get_app_state", None, Duration::from_secs(2))
        .await;

    assert!(!response.is_error());
    assert_eq!(response.result.unwrap().as_str().unwrap(), "Guiding");
    server.await.unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_use_independent_connections() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut reader = BufReader::new(read);
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                let request: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
                let response = serde_json::json!({
                    "id": request["id"],
                    "result": request["method"],
                });
                write
                    .write_all(format!("{}\r\n", response).as_bytes())
                    .await
                    .unwrap();
            });
        }
    });

    let channel = channel_for(addr);
    let (first, second) = tokio::join!(
        channel.send("get_exposure", None, Duration::from_secs(2)),
        channel.send("get_calibrated", None, Duration::from_secs(2)),
    );

    assert_eq!(first.result.unwrap().as_str().unwrap(), "get_exposure");
    assert_eq!(second.result.unwrap().as_str().unwrap(), "get_calibrated");
    assert_ne!(first.id, second.id);
    server.await.unwrap();
}

#[tokio::test]
async fn test_unresponsive_server_yields_synthetic_error_with_request_id() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let channel = channel_for(addr);
    let response = channel
        .send("get_app_state", None, Duration::from_millis(300))
        .await;

    assert_eq!(response.id, "1");
    let error = response.error.unwrap();
    assert_eq!(error.code, SYNTHETIC_ERROR_CODE);
    assert_eq!(error.message, "unable to get response");
    server.abort();
}

#[tokio::test]
async fn test_refused_connection_yields_synthetic_error() {
    // Bind and immediately drop the listener to get a dead port.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let channel = channel_for(addr);
    let response = channel.send("loop", None, Duration::from_secs(2)).await;

    assert!(response.is_error());
    assert_eq!(response.error.unwrap().code, SYNTHETIC_ERROR_CODE);
}
