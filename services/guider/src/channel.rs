//! Request channel: one command/response round trip per connection
//!
//! Every call opens a fresh connection, writes the request as one line,
//! and scans response lines until one carries the request's id. Commands
//! therefore never share a socket with the event stream or with each
//! other; a slow command cannot starve event delivery, and concurrent
//! commands need no protocol-level multiplexing.
//!
//! `send` is total: any fault (no endpoint, connect/write failure, timeout,
//! connection closed early) is converted into a synthetic error response
//! carrying the original request id, never propagated as an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{GuiderError, Result};
use crate::io::ConnectionFactory;
use crate::wire::{Request, Response};

/// Default round-trip timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for lightweight state polls
pub const STATE_POLL_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for stop_capture, which is known to risk a peer deadlock
pub const STOP_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection-per-call command channel
pub struct RequestChannel {
    endpoint: Arc<RwLock<Option<String>>>,
    factory: Arc<dyn ConnectionFactory>,
    connect_timeout: Duration,
    next_id: AtomicU64,
}

impl RequestChannel {
    pub fn new(
        endpoint: Arc<RwLock<Option<String>>>,
        factory: Arc<dyn ConnectionFactory>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            factory,
            connect_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Perform one round trip. Always returns a response; protocol errors
    /// are returned as data after a warning, faults become the synthetic
    /// code -1 response.
    pub async fn send(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Response {
        let id = self.next_id();
        let request = Request::new(method, params, id.clone());

        let response = match tokio::time::timeout(timeout, self.round_trip(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!("Request '{}' failed: {}", method, e);
                Response::unable_to_get_response(id)
            }
            Err(_) => {
                debug!("Request '{}' timed out after {:?}", method, timeout);
                Response::unable_to_get_response(id)
            }
        };

        if let Some(error) = &response.error {
            warn!(
                "Guider returned error for '{}': {} - {}",
                method, error.code, error.message
            );
        }
        response
    }

    async fn round_trip(&self, request: &Request) -> Result<Response> {
        let addr = self
            .endpoint
            .read()
            .await
            .clone()
            .ok_or(GuiderError::NotConnected)?;

        let mut pair = self.factory.connect(&addr, self.connect_timeout).await?;

        let request_json = serde_json::to_string(request)?;
        debug!("Sending request: {}", request_json);
        pair.writer.write_message(&request_json).await?;

        loop {
            match pair.reader.read_line().await? {
                None => {
                    return Err(GuiderError::ConnectionFailed(
                        "connection closed before response".to_string(),
                    ));
                }
                Some(line) => {
                    if line.is_empty() || !line.starts_with('{') {
                        continue;
                    }
                    // Event lines and responses to other ids also arrive on
                    // this connection; anything that is not our response is
                    // discarded.
                    match serde_json::from_str::<Response>(&line) {
                        Ok(response) if response.id == request.id => {
                            debug!("Received response: {}", line);
                            let _ = pair.writer.shutdown().await;
                            return Ok(response);
                        }
                        Ok(response) => {
                            debug!("Discarding non-matching response id {}", response.id);
                        }
                        Err(_) => {
                            debug!("Discarding non-response line: {}", line);
                        }
                    }
                }
            }
        }
    }
}
