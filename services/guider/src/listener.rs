//! Event listener task and event dispatch
//!
//! One long-lived connection per session carries the unsolicited event
//! stream. The task dispatches each line fully before reading the next,
//! so state transitions are linearizable with respect to each other.
//! Recovery actions triggered by events (shift-limit recovery, pixel-scale
//! refresh) run on their own spawned tasks and never block this loop.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::events::ServerEvent;
use crate::session::{GuiderClient, GuiderNotification};

/// Spawn the event listener for a session.
///
/// `ready` resolves with `true` once the connection is up and `false` on
/// any failure, so Connect can await the initial connection. `stop` asks
/// this listener to shut down; it belongs to this spawn alone. Every exit
/// path resets the session state and broadcasts exactly one
/// ConnectionLost notification.
pub(crate) fn spawn_listener(
    client: GuiderClient,
    ready: oneshot::Sender<bool>,
    stop: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ready = Some(ready);
        let mut stop = stop;

        let addr = client.inner.endpoint.read().await.clone();
        let connect_timeout = Duration::from_secs(client.inner.config.connection_timeout_seconds);

        let pair = match addr {
            Some(addr) => match client.inner.factory.connect(&addr, connect_timeout).await {
                Ok(pair) => Some(pair),
                Err(e) => {
                    warn!("Event connection to {} failed: {}", addr, e);
                    None
                }
            },
            None => None,
        };

        let Some(pair) = pair else {
            finish(&client, ready.take(), "could not open event connection").await;
            return;
        };

        // Keep the write half alive so the peer does not see a half-close.
        let _writer = pair.writer;
        let mut reader = pair.reader;

        client.inner.state.update(|s| s.connected = true).await;
        if let Some(tx) = ready.take() {
            let _ = tx.send(true);
        }
        debug!("Event connection established");

        let reason = loop {
            tokio::select! {
                _ = &mut stop => {
                    break "disconnect requested";
                }
                line = reader.read_line() => match line {
                    Ok(None) => break "connection closed by peer",
                    Ok(Some(line)) => {
                        if line.is_empty() || !line.starts_with('{') {
                            continue;
                        }
                        match serde_json::from_str::<ServerEvent>(&line) {
                            Ok(event) => client.dispatch_event(event).await,
                            // Unknown event discriminators and stray
                            // responses are ignored.
                            Err(_) => debug!("Ignoring non-event line: {}", line),
                        }
                    }
                    Err(e) => {
                        debug!("Error reading event stream: {}", e);
                        break "read error";
                    }
                }
            }
        };

        finish(&client, ready.take(), reason).await;
    })
}

/// Uniform cleanup for all listener exit paths
async fn finish(client: &GuiderClient, ready: Option<oneshot::Sender<bool>>, reason: &str) {
    warn!("Event listener stopped: {}", reason);
    client.inner.state.reset_for_disconnect().await;
    if let Some(tx) = ready {
        let _ = tx.send(false);
    }
    let _ = client
        .inner
        .notif_tx
        .send(GuiderNotification::ConnectionLost);
}

impl GuiderClient {
    /// Apply one event to the session: the state-transition table plus the
    /// side effects that hang off specific events.
    pub(crate) async fn dispatch_event(&self, event: ServerEvent) {
        use crate::events::AppState;

        match event {
            ServerEvent::Version { version, .. } => {
                info!("Guider version: {}", version);
                self.inner
                    .state
                    .update(|s| s.server_version = Some(version))
                    .await;
            }
            ServerEvent::AppState { state } => {
                debug!("App state: {}", state);
                self.inner.state.set_app_state_raw(&state).await;
            }
            ServerEvent::GuideStep(stats) => {
                self.inner.state.set_app_state(AppState::Guiding).await;
                let _ = self
                    .inner
                    .notif_tx
                    .send(GuiderNotification::GuideStep(stats));
            }
            ServerEvent::GuidingDithered { dx, dy } => {
                debug!("Dithered by ({:.2}, {:.2})", dx, dy);
                self.inner
                    .state
                    .update(|s| s.last_dither = Some((dx, dy)))
                    .await;
            }
            ServerEvent::Settling {
                distance, time, ..
            } => {
                debug!("Settling: distance={:.2} time={:.1}s", distance, time);
                self.inner.state.begin_settling().await;
            }
            ServerEvent::SettleDone { status, error } => {
                self.inner.state.update(|s| s.last_dither = None).await;
                self.inner.state.end_settling().await;
                match error {
                    Some(error) => {
                        let _ = self.inner.notif_tx.send(GuiderNotification::Warning(
                            format!("Settle failed: {}", error),
                        ));
                    }
                    None => debug!("Settle done (status {})", status),
                }
            }
            ServerEvent::Paused => {
                self.inner.state.set_app_state(AppState::Paused).await;
            }
            ServerEvent::StartCalibration { mount } => {
                debug!("Calibration started on {}", mount);
                self.inner.state.set_app_state(AppState::Calibrating).await;
            }
            ServerEvent::LoopingExposures { .. } => {
                self.inner.state.set_app_state(AppState::Looping).await;
            }
            ServerEvent::LoopingExposuresStopped => {
                self.inner.state.set_app_state(AppState::Stopped).await;
            }
            ServerEvent::CalibrationComplete { mount } => {
                debug!("Calibration complete on {}", mount);
            }
            ServerEvent::StartGuiding => {
                debug!("Guiding started");
            }
            ServerEvent::StarSelected { x, y } => {
                debug!("Star selected at ({:.1}, {:.1})", x, y);
            }
            ServerEvent::LockPositionSet { x, y } => {
                debug!("Lock position set to ({:.1}, {:.1})", x, y);
            }
            ServerEvent::StarLost { status, .. } => {
                debug!("Star lost: {}", status.as_deref().unwrap_or(""));
                self.inner.state.set_app_state(AppState::LostLock).await;
            }
            ServerEvent::LockPositionLost => {
                self.inner.state.set_app_state(AppState::LostLock).await;
            }
            ServerEvent::LockPositionShiftLimitReached => {
                // Detached so the listener keeps draining the socket.
                let client = self.clone();
                tokio::spawn(async move {
                    client.shift_limit_recovery().await;
                });
            }
            ServerEvent::ConfigurationChange => {
                if self.inner.state.is_initialized().await {
                    let client = self.clone();
                    tokio::spawn(async move {
                        client.refresh_pixel_scale().await;
                    });
                }
            }
        }
    }
}
