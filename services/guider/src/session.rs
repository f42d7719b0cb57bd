//! Guider session and workflows
//!
//! [`GuiderClient`] owns one session: the resolved endpoint, the shared
//! state machine, the request channel, and the event listener task. The
//! client is a cheap clone over shared internals so detached recovery
//! tasks can hold their own handle.
//!
//! Workflows return `Ok(true)` on success and `Ok(false)` on a reported
//! soft failure; `Err` is reserved for being disconnected or for response
//! shapes the caller must not ignore. Cancellation is dropping the future.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{RequestChannel, DEFAULT_TIMEOUT, STATE_POLL_TIMEOUT, STOP_CAPTURE_TIMEOUT};
use crate::config::{GuiderConfig, SettleParams};
use crate::error::{GuiderError, Result};
use crate::events::{AppState, GuideStepStats};
use crate::io::{ConnectionFactory, TcpConnectionFactory};
use crate::listener;
use crate::process::GuiderProcessManager;
use crate::state::{Profile, Rect, SessionState, SharedState, ShiftLockState, ShiftRate};

/// Budget for a guide star to be selected after a guide command
const STAR_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);
/// Budget for the app state to reach Stopped after stop_capture
const STOP_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
/// Budget for the app state to leave Paused after a resume
const RESUME_FAILSAFE_TIMEOUT: Duration = Duration::from_secs(60);
/// Grace period on top of the configured settle timeout before the
/// settling flag is force-cleared
const SETTLE_FAILSAFE_MARGIN: Duration = Duration::from_secs(10);
/// Pause before waiting out calibration on a fresh guide command
const CALIBRATION_START_DELAY: Duration = Duration::from_secs(5);
const RETRY_STOP_DELAY: Duration = Duration::from_secs(1);
const RETRY_RESTART_DELAY: Duration = Duration::from_secs(5);
const STATE_WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_START_ATTEMPTS: u32 = 3;

/// Asynchronous notifications surfaced to observers of a session
#[derive(Debug, Clone)]
pub enum GuiderNotification {
    /// One guide exposure's worth of tracking statistics
    GuideStep(GuideStepStats),
    /// The event connection went away; all session state was reset
    ConnectionLost,
    Warning(String),
    Error(String),
}

/// A running event listener: its task plus the channel that asks it, and
/// only it, to stop. Each connect creates a fresh pair, so a stop request
/// raised after the listener already exited can never leak into the next
/// session.
struct ListenerHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub(crate) struct SessionInner {
    pub(crate) config: GuiderConfig,
    pub(crate) endpoint: Arc<RwLock<Option<String>>>,
    pub(crate) factory: Arc<dyn ConnectionFactory>,
    pub(crate) channel: RequestChannel,
    pub(crate) state: SharedState,
    pub(crate) notif_tx: broadcast::Sender<GuiderNotification>,
    listener: Mutex<Option<ListenerHandle>>,
}

/// Client for one guider service session
#[derive(Clone)]
pub struct GuiderClient {
    pub(crate) inner: Arc<SessionInner>,
}

impl GuiderClient {
    pub fn new(config: GuiderConfig) -> Self {
        Self::with_connection_factory(config, Arc::new(TcpConnectionFactory::new()))
    }

    pub fn with_connection_factory(
        config: GuiderConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        let endpoint = Arc::new(RwLock::new(None));
        let channel = RequestChannel::new(
            endpoint.clone(),
            factory.clone(),
            Duration::from_secs(config.connection_timeout_seconds),
        );
        let (notif_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(SessionInner {
                config,
                endpoint,
                factory,
                channel,
                state: SharedState::new(),
                notif_tx,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to guide-step, warning/error, and connection-lost
    /// notifications
    pub fn subscribe(&self) -> broadcast::Receiver<GuiderNotification> {
        self.inner.notif_tx.subscribe()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.is_connected().await
    }

    pub async fn is_initialized(&self) -> bool {
        self.inner.state.is_initialized().await
    }

    pub async fn app_state(&self) -> Option<AppState> {
        self.inner.state.app_state().await
    }

    pub async fn pixel_scale(&self) -> f64 {
        self.inner.state.pixel_scale().await
    }

    pub async fn server_version(&self) -> Option<String> {
        self.inner.state.server_version().await
    }

    pub async fn shift_lock(&self) -> ShiftLockState {
        self.inner.state.shift_lock().await
    }

    pub async fn session_state(&self) -> SessionState {
        self.inner.state.snapshot().await
    }

    // ------------------------------------------------------------------
    // Connect / Disconnect
    // ------------------------------------------------------------------

    /// Establish the session: resolve the endpoint, optionally launch the
    /// guider process, start the event listener, and run first-time setup.
    ///
    /// Setup trouble after the connection is up is reported as a warning
    /// and leaves the session connected but uninitialized.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.state.is_connected().await {
            debug!("Already connected");
            return Ok(());
        }

        let host = &self.inner.config.host;
        let port = self.inner.config.port;
        let addr = resolve_endpoint(host, port).await?;
        info!("Connecting to guider at {}", addr);
        *self.inner.endpoint.write().await = Some(addr);

        if self.inner.config.auto_start {
            // The launched process outlives the session; we only need it
            // reachable before the listener connects.
            let manager = GuiderProcessManager::new(self.inner.config.clone());
            manager.ensure_running().await?;
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = listener::spawn_listener(self.clone(), ready_tx, stop_rx);
        *self.inner.listener.lock().await = Some(ListenerHandle {
            stop: stop_tx,
            task,
        });

        let wait = Duration::from_secs(self.inner.config.connection_timeout_seconds + 5);
        let connected = match tokio::time::timeout(wait, ready_rx).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(_)) | Err(_) => false,
        };
        if !connected {
            *self.inner.endpoint.write().await = None;
            return Err(GuiderError::ConnectionFailed(format!(
                "No connection to guider at {}:{}",
                host, port
            )));
        }

        match self.initialize().await {
            Ok(()) => {
                self.inner.state.update(|s| s.initialized = true).await;
                info!("Guider session initialized");
            }
            Err(e) => {
                warn!("Session initialization incomplete: {}", e);
                let _ = self.inner.notif_tx.send(GuiderNotification::Warning(format!(
                    "Guider initialization incomplete: {}",
                    e
                )));
            }
        }
        Ok(())
    }

    /// First-time setup once the event connection is up: profiles,
    /// equipment, looping, shift-lock parameters, pixel scale.
    async fn initialize(&self) -> Result<()> {
        let profiles = self.get_profiles().await?;
        let active = self.get_profile().await?;
        debug!(
            "Server has {} profiles, active: {}",
            profiles.len(),
            active.name
        );
        self.inner
            .state
            .update(|s| {
                s.profiles = profiles.clone();
                s.active_profile = Some(active.clone());
            })
            .await;

        if let Some(wanted) = self.inner.config.profile_id {
            if active.id != wanted {
                self.change_profile(wanted).await?;
            }
            let selected = profiles.iter().find(|p| p.id == wanted).cloned();
            self.inner
                .state
                .update(|s| s.selected_profile = selected)
                .await;
        }

        if !self.get_connected().await? {
            info!("Connecting guider equipment");
            self.set_connected(true).await?;
        }

        let state = self.fetch_app_state().await?;
        if state.parse::<AppState>().ok() == Some(AppState::Stopped) {
            debug!("Guider idle, resuming looping");
            self.loop_exposures().await?;
        }

        self.refresh_shift_lock_params().await;

        let scale = self.get_pixel_scale().await?;
        debug!("Pixel scale: {:.3} arcsec/px", scale);
        self.inner.state.update(|s| s.pixel_scale = scale).await;
        Ok(())
    }

    /// Switch the active server profile. Equipment must be disconnected
    /// for the switch to take.
    async fn change_profile(&self, id: i32) -> Result<()> {
        info!("Switching guider profile to {}", id);
        self.set_connected(false).await?;
        self.set_profile(id).await?;
        self.set_connected(true).await?;
        let active = self.get_profile().await?;
        self.inner
            .state
            .update(|s| s.active_profile = Some(active))
            .await;
        Ok(())
    }

    /// Tear down the session. The listener performs the state reset and
    /// raises the connection-lost notification.
    pub async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from guider");
        self.inner.state.update(|s| s.initialized = false).await;
        *self.inner.endpoint.write().await = None;
        if let Some(listener) = self.inner.listener.lock().await.take() {
            // The send fails when the listener already exited after a
            // connection loss; that is fine, there is nothing to stop.
            let _ = listener.stop.send(());
            let mut task = listener.task;
            if tokio::time::timeout(Duration::from_secs(5), &mut task)
                .await
                .is_err()
            {
                warn!("Event listener did not stop in time, aborting it");
                task.abort();
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Guiding workflows
    // ------------------------------------------------------------------

    /// Start guiding, selecting a star and calibrating as needed.
    ///
    /// Already guiding is success without any command. Returns `Ok(false)`
    /// after reporting when guiding could not be started within the
    /// configured attempts.
    pub async fn start_guiding(&self, force_calibration: bool, wait_for_settle: bool) -> Result<bool> {
        if !self.inner.state.is_connected().await {
            return Err(GuiderError::NotConnected);
        }

        match self.inner.state.app_state().await {
            Some(AppState::Guiding) => {
                debug!("Already guiding");
                return Ok(true);
            }
            Some(AppState::LostLock) => {
                debug!("Lock lost, stopping guiding before restart");
                let _ = self.stop_guiding().await;
            }
            Some(AppState::Calibrating) => {
                debug!("Calibration in progress, waiting for it to finish");
                self.wait_for_calibration_finish().await;
            }
            _ => {}
        }

        let is_calibrated = if force_calibration {
            false
        } else {
            self.get_calibrated().await.unwrap_or(false)
        };

        let max_attempts = if self.inner.config.auto_retry_start_guiding {
            MAX_START_ATTEMPTS
        } else {
            1
        };
        let attempt_budget =
            Duration::from_secs(self.inner.config.guiding_start_retry_timeout_seconds);

        for attempt in 1..=max_attempts {
            self.wait_for_settle_clear().await;

            let mut params = json!({
                "settle": settle_json(&self.inner.config.settle),
                "recalibrate": force_calibration,
            });
            if let Some(roi) = self.star_search_roi().await {
                params["roi"] = json!([roi.x, roi.y, roi.width, roi.height]);
            }
            let response = self.inner.channel.send("guide", Some(params), DEFAULT_TIMEOUT).await;
            if response.is_error() {
                self.report_error("Guide command failed").await;
                return Ok(false);
            }

            if tokio::time::timeout(STAR_SELECTION_TIMEOUT, self.wait_for_lock_position())
                .await
                .is_err()
            {
                warn!(
                    "No guide star selected within {:?} (attempt {}/{})",
                    STAR_SELECTION_TIMEOUT, attempt, max_attempts
                );
                if attempt == max_attempts {
                    self.report_error("Failed to select a guide star").await;
                    return Ok(false);
                }
                continue;
            }

            if !is_calibrated {
                tokio::time::sleep(CALIBRATION_START_DELAY).await;
                self.wait_for_calibration_finish().await;
            }

            match tokio::time::timeout(attempt_budget, self.wait_for_app_state(AppState::Guiding))
                .await
            {
                Ok(()) => {
                    self.inner.state.begin_settling().await;
                    if wait_for_settle {
                        self.wait_for_settle_clear().await;
                    }
                    info!("Guiding started");
                    return Ok(true);
                }
                Err(_) => {
                    warn!(
                        "Guiding did not start within {:?} (attempt {}/{})",
                        attempt_budget, attempt, max_attempts
                    );
                    if attempt == max_attempts {
                        self.report_error("Guiding failed to start").await;
                        return Ok(false);
                    }
                    // Stop between attempts so a stuck exposure is visible
                    // in the guider before the next try.
                    tokio::time::sleep(RETRY_STOP_DELAY).await;
                    let _ = self.stop_guiding().await;
                    tokio::time::sleep(RETRY_RESTART_DELAY).await;
                }
            }
        }
        Ok(false)
    }

    /// Stop an active capture and wait for the guider to report Stopped.
    /// Not guiding (or only looping) is a no-op returning `Ok(false)`.
    pub async fn stop_guiding(&self) -> Result<bool> {
        if !self.inner.state.is_connected().await {
            return Err(GuiderError::NotConnected);
        }
        match self.inner.state.app_state().await {
            Some(AppState::Guiding | AppState::Calibrating | AppState::LostLock) => {}
            state => {
                debug!("Nothing to stop in state {:?}", state);
                return Ok(false);
            }
        }

        let response = self
            .inner
            .channel
            .send("stop_capture", None, STOP_CAPTURE_TIMEOUT)
            .await;
        if response.is_error() {
            self.report_warning("Stop capture failed".to_string()).await;
            return Ok(false);
        }

        if tokio::time::timeout(STOP_WAIT_TIMEOUT, self.wait_for_app_state(AppState::Stopped))
            .await
            .is_err()
        {
            self.report_warning("Guider did not report stopped in time".to_string())
                .await;
            return Ok(false);
        }
        Ok(true)
    }

    /// Shift the lock position by the configured dither amount and wait
    /// for settling. Refused unless actively guiding.
    pub async fn dither(&self) -> Result<bool> {
        if !self.inner.state.is_connected().await {
            return Err(GuiderError::NotConnected);
        }
        match self.inner.state.app_state().await {
            Some(AppState::Guiding) => {}
            Some(AppState::LostLock) => {
                self.report_warning("Dither skipped: lost lock".to_string()).await;
                return Ok(false);
            }
            _ => {
                self.report_warning("Dither skipped: not guiding".to_string()).await;
                return Ok(false);
            }
        }

        self.wait_for_settle_clear().await;

        let params = json!({
            "amount": self.inner.config.dither_pixels,
            "raOnly": self.inner.config.dither_ra_only,
            "settle": settle_json(&self.inner.config.settle),
        });
        let response = self.inner.channel.send("dither", Some(params), DEFAULT_TIMEOUT).await;
        if response.is_error() {
            self.report_error("Dither command failed").await;
            return Ok(false);
        }

        self.inner.state.begin_settling().await;
        self.wait_for_settle_clear().await;
        Ok(true)
    }

    pub async fn pause(&self) -> Result<bool> {
        self.set_paused(true).await
    }

    pub async fn resume(&self) -> Result<bool> {
        self.set_paused(false).await
    }

    /// Pause or resume guide corrections. A resume additionally waits for
    /// the guider to leave Paused, since some servers acknowledge the
    /// command without acting on it.
    pub async fn set_paused(&self, paused: bool) -> Result<bool> {
        if !self.inner.state.is_connected().await {
            return Err(GuiderError::NotConnected);
        }
        let params = if paused {
            json!([true, "full"])
        } else {
            json!([false])
        };
        let response = self
            .inner
            .channel
            .send("set_paused", Some(params), DEFAULT_TIMEOUT)
            .await;
        if response.is_error() {
            self.report_warning(format!(
                "Could not {} guiding",
                if paused { "pause" } else { "resume" }
            ))
            .await;
            return Ok(false);
        }

        if !paused {
            let left_paused = async {
                while self.inner.state.app_state().await == Some(AppState::Paused) {
                    tokio::time::sleep(STATE_WAIT_POLL_INTERVAL).await;
                }
            };
            if tokio::time::timeout(RESUME_FAILSAFE_TIMEOUT, left_paused)
                .await
                .is_err()
            {
                self.report_warning("Guider still paused after resume".to_string())
                    .await;
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Discard mount and AO calibration data
    pub async fn clear_calibration(&self) -> Result<bool> {
        if !self.inner.state.is_connected().await {
            return Err(GuiderError::NotConnected);
        }
        let response = self
            .inner
            .channel
            .send("clear_calibration", Some(json!(["both"])), DEFAULT_TIMEOUT)
            .await;
        if response.is_error() {
            self.report_warning("Clear calibration failed".to_string()).await;
            return Ok(false);
        }
        Ok(true)
    }

    /// Ask the guider to pick a guide star, constrained to the configured
    /// region of interest when one applies
    pub async fn auto_select_guide_star(&self) -> Result<bool> {
        if !self.inner.state.is_connected().await {
            return Err(GuiderError::NotConnected);
        }
        let params = self
            .star_search_roi()
            .await
            .map(|roi| json!([[roi.x, roi.y, roi.width, roi.height]]));
        let response = self.inner.channel.send("find_star", params, DEFAULT_TIMEOUT).await;
        if response.is_error() {
            self.report_warning("Auto star selection failed".to_string()).await;
            return Ok(false);
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Shift-lock tracking
    // ------------------------------------------------------------------

    /// Apply a constant lock-position drift. A disabled rate delegates to
    /// [`Self::stop_shifting`]. Any failed sub-call returns `Ok(false)`
    /// without retry.
    pub async fn set_shift_rate(&self, rate: ShiftRate) -> Result<bool> {
        if !self.inner.state.is_connected().await {
            return Err(GuiderError::NotConnected);
        }
        if !rate.enabled {
            return self.stop_shifting().await;
        }

        self.inner
            .state
            .update(|s| s.desired_shift_rate = Some(rate))
            .await;

        let params = json!({
            "rate": [rate.ra_arcsec_per_hour, rate.dec_arcsec_per_hour],
            "units": "arcsec/hr",
            "axes": "RA/Dec",
        });
        let response = self
            .inner
            .channel
            .send("set_lock_shift_params", Some(params), DEFAULT_TIMEOUT)
            .await;
        if response.is_error() {
            self.report_warning("Failed to set lock shift rate".to_string()).await;
            return Ok(false);
        }

        let response = self
            .inner
            .channel
            .send("set_lock_shift_enabled", Some(json!([true])), DEFAULT_TIMEOUT)
            .await;
        if response.is_error() {
            self.report_warning("Failed to enable lock shift".to_string()).await;
            return Ok(false);
        }

        self.refresh_shift_lock_params().await;
        Ok(true)
    }

    /// Disable lock-position shifting
    pub async fn stop_shifting(&self) -> Result<bool> {
        if !self.inner.state.is_connected().await {
            return Err(GuiderError::NotConnected);
        }
        self.inner
            .state
            .update(|s| s.desired_shift_rate = None)
            .await;
        let response = self
            .inner
            .channel
            .send("set_lock_shift_enabled", Some(json!([false])), DEFAULT_TIMEOUT)
            .await;
        if response.is_error() {
            self.report_warning("Failed to disable lock shift".to_string()).await;
            return Ok(false);
        }
        self.inner
            .state
            .update(|s| s.shift_lock = ShiftLockState::default())
            .await;
        Ok(true)
    }

    /// Re-query shift-lock parameters and canonicalize the rate to
    /// degrees/hour. A failed query disables shift tracking locally.
    pub async fn refresh_shift_lock_params(&self) {
        match self.get_lock_shift_params().await {
            Ok(params) => {
                let scale = self.inner.state.pixel_scale().await;
                let ra = params.rate.first().copied().unwrap_or(0.0);
                let dec = params.rate.get(1).copied().unwrap_or(0.0);
                let converted = match params.units.as_deref() {
                    Some("arcsec/hr") => Some((ra / 3600.0, dec / 3600.0)),
                    Some("pixels/hr") => Some((ra * scale / 3600.0, dec * scale / 3600.0)),
                    other => {
                        warn!("Unrecognized lock shift units {:?}", other);
                        None
                    }
                };
                let shift_lock = match converted {
                    Some((ra_deg_per_hour, dec_deg_per_hour)) => ShiftLockState {
                        enabled: params.enabled,
                        ra_deg_per_hour,
                        dec_deg_per_hour,
                        axes: params.axes.unwrap_or_default(),
                    },
                    None => ShiftLockState::default(),
                };
                self.inner.state.update(|s| s.shift_lock = shift_lock).await;
            }
            Err(e) => {
                debug!("Disabling shift tracking: {}", e);
                self.inner
                    .state
                    .update(|s| s.shift_lock = ShiftLockState::default())
                    .await;
            }
        }
    }

    /// Recovery after the lock-position shift ran out of travel: stop,
    /// restart without waiting for settle, then reapply the last rate a
    /// caller asked for.
    pub(crate) async fn shift_limit_recovery(&self) {
        self.report_warning("Lock position shift limit reached, restarting guiding".to_string())
            .await;

        let rate = self.inner.state.snapshot().await.desired_shift_rate;

        if let Err(e) = self.stop_guiding().await {
            warn!("Stop before shift-limit restart failed: {}", e);
        }

        match self.start_guiding(false, false).await {
            Ok(true) => {
                if let Some(rate) = rate.filter(|r| r.enabled) {
                    match self.set_shift_rate(rate).await {
                        Ok(true) => info!("Shift rate reapplied after lock shift limit"),
                        _ => {
                            self.report_error("Failed to reapply shift rate after restart")
                                .await
                        }
                    }
                }
            }
            _ => {
                self.report_error("Failed to restart guiding after lock shift limit")
                    .await
            }
        }
    }

    /// Refetch the pixel scale after a server configuration change
    pub(crate) async fn refresh_pixel_scale(&self) {
        match self.get_pixel_scale().await {
            Ok(scale) => {
                debug!("Pixel scale now {:.3} arcsec/px", scale);
                self.inner.state.update(|s| s.pixel_scale = scale).await;
            }
            Err(e) => warn!("Could not refresh pixel scale: {}", e),
        }
    }

    // ------------------------------------------------------------------
    // Waits
    // ------------------------------------------------------------------

    async fn wait_for_app_state(&self, target: AppState) {
        loop {
            if self.inner.state.app_state().await == Some(target) {
                return;
            }
            tokio::time::sleep(STATE_WAIT_POLL_INTERVAL).await;
        }
    }

    async fn wait_for_calibration_finish(&self) {
        while self.inner.state.app_state().await == Some(AppState::Calibrating) {
            tokio::time::sleep(STATE_WAIT_POLL_INTERVAL).await;
        }
    }

    /// Wait for settling to clear. If no completion event arrives within
    /// the configured settle timeout plus a grace period, force-clear the
    /// flag and warn once rather than wait forever.
    pub(crate) async fn wait_for_settle_clear(&self) {
        let failsafe =
            Duration::from_secs(self.inner.config.settle.timeout as u64) + SETTLE_FAILSAFE_MARGIN;
        loop {
            if !self.inner.state.is_settling().await {
                return;
            }
            if let Some(elapsed) = self.inner.state.settle_elapsed().await {
                if elapsed >= failsafe {
                    self.inner.state.end_settling().await;
                    self.report_warning(format!(
                        "Settle did not complete within {:?}, continuing",
                        failsafe
                    ))
                    .await;
                    return;
                }
            }
            tokio::time::sleep(SETTLE_POLL_INTERVAL).await;
        }
    }

    /// Poll until the server reports a lock position, once per exposure
    async fn wait_for_lock_position(&self) {
        let interval = match self.get_exposure().await {
            Ok(ms) => Duration::from_millis(ms).max(Duration::from_secs(1)),
            Err(_) => Duration::from_secs(1),
        };
        loop {
            if let Ok(Some(_)) = self.get_lock_position().await {
                return;
            }
            tokio::time::sleep(interval).await;
        }
    }

    // ------------------------------------------------------------------
    // Typed accessors over the request channel
    // ------------------------------------------------------------------

    /// One round trip, converting a protocol error object into `Err`
    async fn request_value(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let response = self.inner.channel.send(method, params, timeout).await;
        match response.error {
            Some(error) => Err(GuiderError::Rpc {
                code: error.code,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(serde_json::Value::Null)),
        }
    }

    pub async fn get_profiles(&self) -> Result<Vec<Profile>> {
        let value = self.request_value("get_profiles", None, DEFAULT_TIMEOUT).await?;
        serde_json::from_value(value).map_err(GuiderError::Json)
    }

    pub async fn get_profile(&self) -> Result<Profile> {
        let value = self.request_value("get_profile", None, DEFAULT_TIMEOUT).await?;
        serde_json::from_value(value).map_err(GuiderError::Json)
    }

    async fn set_profile(&self, id: i32) -> Result<()> {
        self.request_value("set_profile", Some(json!([id])), DEFAULT_TIMEOUT)
            .await
            .map(|_| ())
    }

    /// Whether the guider-side equipment is connected
    pub async fn get_connected(&self) -> Result<bool> {
        let value = self.request_value("get_connected", None, DEFAULT_TIMEOUT).await?;
        value
            .as_bool()
            .ok_or_else(|| GuiderError::InvalidResponse(format!("get_connected: {}", value)))
    }

    async fn set_connected(&self, connected: bool) -> Result<()> {
        self.request_value("set_connected", Some(json!([connected])), DEFAULT_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn fetch_app_state(&self) -> Result<String> {
        let value = self
            .request_value("get_app_state", None, STATE_POLL_TIMEOUT)
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GuiderError::InvalidResponse(format!("get_app_state: {}", value)))
    }

    pub async fn get_calibrated(&self) -> Result<bool> {
        let value = self
            .request_value("get_calibrated", None, STATE_POLL_TIMEOUT)
            .await?;
        value
            .as_bool()
            .ok_or_else(|| GuiderError::InvalidResponse(format!("get_calibrated: {}", value)))
    }

    /// Arcsec per guide-camera pixel
    pub async fn get_pixel_scale(&self) -> Result<f64> {
        let value = self
            .request_value("get_pixel_scale", None, STATE_POLL_TIMEOUT)
            .await?;
        value
            .as_f64()
            .ok_or_else(|| GuiderError::InvalidResponse(format!("get_pixel_scale: {}", value)))
    }

    /// Current guide exposure duration in milliseconds
    pub async fn get_exposure(&self) -> Result<u64> {
        let value = self
            .request_value("get_exposure", None, STATE_POLL_TIMEOUT)
            .await?;
        value
            .as_u64()
            .ok_or_else(|| GuiderError::InvalidResponse(format!("get_exposure: {}", value)))
    }

    pub async fn get_camera_frame_size(&self) -> Result<(u32, u32)> {
        let value = self
            .request_value("get_camera_frame_size", None, STATE_POLL_TIMEOUT)
            .await?;
        let size: Vec<u32> = serde_json::from_value(value).map_err(GuiderError::Json)?;
        match size.as_slice() {
            [width, height] => Ok((*width, *height)),
            _ => Err(GuiderError::InvalidResponse(format!(
                "get_camera_frame_size returned {} values",
                size.len()
            ))),
        }
    }

    /// Current lock position, `None` when no star is locked
    pub async fn get_lock_position(&self) -> Result<Option<(f64, f64)>> {
        let value = self
            .request_value("get_lock_position", None, STATE_POLL_TIMEOUT)
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let position: Vec<f64> = serde_json::from_value(value).map_err(GuiderError::Json)?;
        match position.as_slice() {
            [x, y] => Ok(Some((*x, *y))),
            _ => Err(GuiderError::InvalidResponse(format!(
                "get_lock_position returned {} values",
                position.len()
            ))),
        }
    }

    async fn get_lock_shift_params(&self) -> Result<LockShiftParams> {
        let value = self
            .request_value("get_lock_shift_params", None, STATE_POLL_TIMEOUT)
            .await?;
        serde_json::from_value(value).map_err(GuiderError::Json)
    }

    async fn loop_exposures(&self) -> Result<()> {
        self.request_value("loop", None, DEFAULT_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn star_search_roi(&self) -> Option<Rect> {
        if self.inner.config.roi_pct >= 100 {
            return None;
        }
        match self.get_camera_frame_size().await {
            Ok((width, height)) => Rect::centered_roi(width, height, self.inner.config.roi_pct),
            Err(e) => {
                debug!("No camera frame size, searching the full frame: {}", e);
                None
            }
        }
    }

    async fn report_warning(&self, message: String) {
        warn!("{}", message);
        let _ = self
            .inner
            .notif_tx
            .send(GuiderNotification::Warning(message));
    }

    async fn report_error(&self, message: &str) {
        warn!("{}", message);
        let _ = self
            .inner
            .notif_tx
            .send(GuiderNotification::Error(message.to_string()));
    }
}

/// Shift-lock parameters as reported by the server
#[derive(Debug, Deserialize)]
struct LockShiftParams {
    enabled: bool,
    #[serde(default)]
    rate: Vec<f64>,
    #[serde(default)]
    units: Option<String>,
    #[serde(default)]
    axes: Option<String>,
}

fn settle_json(settle: &SettleParams) -> serde_json::Value {
    json!({
        "pixels": settle.pixels,
        "time": settle.time,
        "timeout": settle.timeout,
    })
}

/// Resolve `host:port` to the first IPv4 address
async fn resolve_endpoint(host: &str, port: u16) -> Result<String> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| GuiderError::HostResolution(format!("{}: {}", host, e)))?;
    let addr = addrs
        .find(|a| a.is_ipv4())
        .ok_or_else(|| GuiderError::HostResolution(format!("No IPv4 address for {}", host)))?;
    Ok(addr.to_string())
}
