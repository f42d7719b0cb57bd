//! Shared session state
//!
//! All mutable session state lives behind explicit synchronization in one
//! place. The event dispatcher is the only writer once a session is up;
//! workflows read through the accessors here. The settling flag gets its
//! own mutex because workflows both read and force-clear it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::events::AppState;

/// Equipment profile on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: i32,
    pub name: String,
}

/// Rectangle for star-search regions of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Centered sub-rectangle covering `pct` percent of each dimension of a
    /// `width` x `height` frame. Returns None when the percentage does not
    /// actually constrain the search.
    pub fn centered_roi(width: u32, height: u32, pct: u32) -> Option<Self> {
        if pct == 0 || pct >= 100 {
            return None;
        }
        let w = width * pct / 100;
        let h = height * pct / 100;
        Some(Self::new((width - w) / 2, (height - h) / 2, w, h))
    }
}

/// Constant drift to apply to the lock position, as requested by a caller.
/// Carried in the wire's native arcsec/hour and sent verbatim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftRate {
    pub ra_arcsec_per_hour: f64,
    pub dec_arcsec_per_hour: f64,
    pub enabled: bool,
}

impl ShiftRate {
    pub fn new(ra_arcsec_per_hour: f64, dec_arcsec_per_hour: f64) -> Self {
        Self {
            ra_arcsec_per_hour,
            dec_arcsec_per_hour,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            ra_arcsec_per_hour: 0.0,
            dec_arcsec_per_hour: 0.0,
            enabled: false,
        }
    }
}

/// Shift-lock state as last reported by the server, with the rate
/// canonicalized to degrees/hour
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShiftLockState {
    pub enabled: bool,
    pub ra_deg_per_hour: f64,
    pub dec_deg_per_hour: f64,
    pub axes: String,
}

/// Settling flag plus the moment it was raised, for the failsafe clock
#[derive(Debug, Clone, Default)]
pub struct SettleState {
    pub settling: bool,
    pub since: Option<tokio::time::Instant>,
}

/// Everything the event dispatcher maintains for a session
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub connected: bool,
    pub initialized: bool,
    pub server_version: Option<String>,
    pub app_state: Option<AppState>,
    /// Raw state string as received, kept for unrecognized server states
    pub app_state_raw: String,
    /// Arcsec per guide-camera pixel; 0.0 until fetched
    pub pixel_scale: f64,
    pub profiles: Vec<Profile>,
    /// Last profile reported active by the server
    pub active_profile: Option<Profile>,
    /// Profile chosen through configuration; may diverge from active until
    /// the connect workflow reconciles them
    pub selected_profile: Option<Profile>,
    /// Amplitude of the last dither, cleared when settling completes
    pub last_dither: Option<(f64, f64)>,
    pub shift_lock: ShiftLockState,
    /// Last rate a caller asked for, reapplied by shift-limit recovery
    pub desired_shift_rate: Option<ShiftRate>,
}

/// Clone-able handle to the synchronized session state
#[derive(Clone, Default)]
pub struct SharedState {
    state: Arc<RwLock<SessionState>>,
    settle: Arc<Mutex<SettleState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.initialized
    }

    pub async fn app_state(&self) -> Option<AppState> {
        self.state.read().await.app_state
    }

    pub async fn pixel_scale(&self) -> f64 {
        self.state.read().await.pixel_scale
    }

    pub async fn server_version(&self) -> Option<String> {
        self.state.read().await.server_version.clone()
    }

    pub async fn shift_lock(&self) -> ShiftLockState {
        self.state.read().await.shift_lock.clone()
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    pub async fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.write().await;
        f(&mut state)
    }

    /// Adopt a state string from the server, keeping the raw text
    pub async fn set_app_state_raw(&self, raw: &str) {
        let parsed = raw.parse::<AppState>().ok();
        let mut state = self.state.write().await;
        state.app_state = parsed;
        state.app_state_raw = raw.to_string();
    }

    pub async fn set_app_state(&self, app_state: AppState) {
        let mut state = self.state.write().await;
        state.app_state = Some(app_state);
        state.app_state_raw = app_state.to_string();
    }

    pub async fn is_settling(&self) -> bool {
        self.settle.lock().await.settling
    }

    /// Raise the settling flag and start its failsafe clock
    pub async fn begin_settling(&self) {
        let mut settle = self.settle.lock().await;
        settle.settling = true;
        settle.since = Some(tokio::time::Instant::now());
    }

    pub async fn end_settling(&self) {
        let mut settle = self.settle.lock().await;
        settle.settling = false;
        settle.since = None;
    }

    pub async fn settle_elapsed(&self) -> Option<tokio::time::Duration> {
        let settle = self.settle.lock().await;
        settle.since.map(|since| since.elapsed())
    }

    /// Reset everything the connection lifetime owns. Run on every listener
    /// exit path.
    pub async fn reset_for_disconnect(&self) {
        {
            let mut settle = self.settle.lock().await;
            settle.settling = false;
            settle.since = None;
        }
        let mut state = self.state.write().await;
        state.connected = false;
        state.initialized = false;
        state.app_state = None;
        state.app_state_raw.clear();
        state.pixel_scale = 0.0;
        state.last_dither = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_roi() {
        let roi = Rect::centered_roi(1000, 800, 50).unwrap();
        assert_eq!(roi, Rect::new(250, 200, 500, 400));
    }

    #[test]
    fn test_centered_roi_full_frame_disables() {
        assert!(Rect::centered_roi(1000, 800, 100).is_none());
        assert!(Rect::centered_roi(1000, 800, 0).is_none());
    }

    #[tokio::test]
    async fn test_initial_state() {
        let shared = SharedState::new();
        assert!(!shared.is_connected().await);
        assert!(!shared.is_initialized().await);
        assert!(shared.app_state().await.is_none());
        assert_eq!(shared.pixel_scale().await, 0.0);
        assert!(!shared.is_settling().await);
    }

    #[tokio::test]
    async fn test_set_app_state_raw_known_and_unknown() {
        let shared = SharedState::new();
        shared.set_app_state_raw("Guiding").await;
        assert_eq!(shared.app_state().await, Some(AppState::Guiding));

        shared.set_app_state_raw("SomethingNew").await;
        assert_eq!(shared.app_state().await, None);
        assert_eq!(shared.snapshot().await.app_state_raw, "SomethingNew");
    }

    #[tokio::test]
    async fn test_reset_for_disconnect() {
        let shared = SharedState::new();
        shared
            .update(|s| {
                s.connected = true;
                s.initialized = true;
                s.pixel_scale = 1.3;
            })
            .await;
        shared.set_app_state(AppState::Guiding).await;
        shared.begin_settling().await;

        shared.reset_for_disconnect().await;

        let snapshot = shared.snapshot().await;
        assert!(!snapshot.connected);
        assert!(!snapshot.initialized);
        assert!(snapshot.app_state.is_none());
        assert!(snapshot.app_state_raw.is_empty());
        assert_eq!(snapshot.pixel_scale, 0.0);
        assert!(!shared.is_settling().await);
    }
}
