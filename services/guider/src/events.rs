//! Event notifications and application state

use serde::{Deserialize, Serialize};

use crate::error::GuiderError;

/// Guider application state
///
/// Closed enumeration of the states the server reports. Unrecognized
/// states fail to parse; the session keeps the raw string beside the
/// parsed value so new server states are still observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    Stopped,
    Selected,
    Calibrating,
    Guiding,
    LostLock,
    Paused,
    Looping,
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppState::Stopped => write!(f, "Stopped"),
            AppState::Selected => write!(f, "Selected"),
            AppState::Calibrating => write!(f, "Calibrating"),
            AppState::Guiding => write!(f, "Guiding"),
            AppState::LostLock => write!(f, "LostLock"),
            AppState::Paused => write!(f, "Paused"),
            AppState::Looping => write!(f, "Looping"),
        }
    }
}

impl std::str::FromStr for AppState {
    type Err = GuiderError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Stopped" => Ok(AppState::Stopped),
            "Selected" => Ok(AppState::Selected),
            "Calibrating" => Ok(AppState::Calibrating),
            "Guiding" => Ok(AppState::Guiding),
            "LostLock" => Ok(AppState::LostLock),
            "Paused" => Ok(AppState::Paused),
            "Looping" => Ok(AppState::Looping),
            _ => Err(GuiderError::InvalidState(format!("Unknown state: {}", s))),
        }
    }
}

/// Guide step statistics, one per guide exposure
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GuideStepStats {
    pub frame: u64,
    pub time: f64,
    pub mount: String,
    #[serde(rename = "dx")]
    pub dx: f64,
    #[serde(rename = "dy")]
    pub dy: f64,
    #[serde(rename = "RADistanceRaw")]
    pub ra_distance_raw: Option<f64>,
    #[serde(rename = "DECDistanceRaw")]
    pub dec_distance_raw: Option<f64>,
    #[serde(rename = "RADuration")]
    pub ra_duration: Option<i32>,
    #[serde(rename = "RADirection")]
    pub ra_direction: Option<String>,
    #[serde(rename = "DECDuration")]
    pub dec_duration: Option<i32>,
    #[serde(rename = "DECDirection")]
    pub dec_direction: Option<String>,
    #[serde(rename = "StarMass")]
    pub star_mass: Option<f64>,
    #[serde(rename = "SNR")]
    pub snr: Option<f64>,
    #[serde(rename = "HFD")]
    pub hfd: Option<f64>,
    #[serde(rename = "AvgDist")]
    pub avg_dist: Option<f64>,
    #[serde(rename = "ErrorCode")]
    pub error_code: Option<i32>,
}

/// Unsolicited event notification from the guider service
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Event")]
pub enum ServerEvent {
    /// Sent on connection, carries the server version
    Version {
        #[serde(rename = "PHDVersion")]
        version: String,
        #[serde(rename = "PHDSubver")]
        subver: Option<String>,
        #[serde(rename = "MsgVersion")]
        msg_version: Option<u32>,
    },

    /// Application state snapshot
    AppState {
        #[serde(rename = "State")]
        state: String,
    },

    /// Guide step with statistics
    GuideStep(GuideStepStats),

    /// Dither offset was applied
    GuidingDithered {
        #[serde(rename = "dx")]
        dx: f64,
        #[serde(rename = "dy")]
        dy: f64,
    },

    /// Settling in progress
    Settling {
        #[serde(rename = "Distance")]
        distance: f64,
        #[serde(rename = "Time")]
        time: f64,
        #[serde(rename = "SettleTime")]
        settle_time: f64,
        #[serde(rename = "StarLocked")]
        star_locked: Option<bool>,
    },

    /// Settling finished, successfully or not
    SettleDone {
        #[serde(rename = "Status")]
        status: i32,
        #[serde(rename = "Error")]
        error: Option<String>,
    },

    /// Guiding was paused
    Paused,

    /// Calibration started
    StartCalibration {
        #[serde(rename = "Mount")]
        mount: String,
    },

    /// Looping exposures started
    LoopingExposures {
        #[serde(rename = "Frame")]
        frame: u64,
    },

    /// Looping exposures stopped
    LoopingExposuresStopped,

    /// Calibration finished
    CalibrationComplete {
        #[serde(rename = "Mount")]
        mount: String,
    },

    /// A guide star was selected
    StarSelected {
        #[serde(rename = "X")]
        x: f64,
        #[serde(rename = "Y")]
        y: f64,
    },

    /// The guide star was lost
    StarLost {
        #[serde(rename = "Frame")]
        frame: Option<u64>,
        #[serde(rename = "Time")]
        time: Option<f64>,
        #[serde(rename = "StarMass")]
        star_mass: Option<f64>,
        #[serde(rename = "SNR")]
        snr: Option<f64>,
        #[serde(rename = "AvgDist")]
        avg_dist: Option<f64>,
        #[serde(rename = "ErrorCode")]
        error_code: Option<i32>,
        #[serde(rename = "Status")]
        status: Option<String>,
    },

    /// Guiding started
    StartGuiding,

    /// Lock position was set
    LockPositionSet {
        #[serde(rename = "X")]
        x: f64,
        #[serde(rename = "Y")]
        y: f64,
    },

    /// Lock position was lost
    LockPositionLost,

    /// The configured lock-position shift reached its travel limit
    LockPositionShiftLimitReached,

    /// Server configuration changed
    ConfigurationChange,
}
