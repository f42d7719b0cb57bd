//! Configuration types for the guider service client

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub guider: GuiderConfig,
}

/// Guider connection and workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuiderConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Server instance number, passed to the executable as `-i N`
    #[serde(default = "default_instance")]
    pub instance: u32,
    #[serde(default)]
    pub executable_path: Option<PathBuf>,
    #[serde(default)]
    pub auto_start: bool,
    /// Profile to apply after connecting, when it differs from the server's
    /// active profile. None leaves the server profile alone.
    #[serde(default)]
    pub profile_id: Option<i32>,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
    /// Dither amplitude in guide-camera pixels
    #[serde(default = "default_dither_pixels")]
    pub dither_pixels: f64,
    /// Restrict dithering to the RA axis
    #[serde(default)]
    pub dither_ra_only: bool,
    #[serde(default)]
    pub settle: SettleParams,
    /// Star-search region of interest, percent of each frame dimension,
    /// centered. 100 disables the ROI.
    #[serde(default = "default_roi_pct")]
    pub roi_pct: u32,
    /// Retry the guide command when guiding fails to start
    #[serde(default = "default_auto_retry")]
    pub auto_retry_start_guiding: bool,
    /// Per-attempt budget for guiding to start, in seconds
    #[serde(default = "default_retry_timeout")]
    pub guiding_start_retry_timeout_seconds: u64,
}

impl Default for GuiderConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            instance: default_instance(),
            executable_path: None,
            auto_start: false,
            profile_id: None,
            connection_timeout_seconds: default_connection_timeout(),
            dither_pixels: default_dither_pixels(),
            dither_ra_only: false,
            settle: SettleParams::default(),
            roi_pct: default_roi_pct(),
            auto_retry_start_guiding: default_auto_retry(),
            guiding_start_retry_timeout_seconds: default_retry_timeout(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    4400
}

fn default_instance() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_dither_pixels() -> f64 {
    5.0
}

fn default_roi_pct() -> u32 {
    100
}

fn default_auto_retry() -> bool {
    false
}

fn default_retry_timeout() -> u64 {
    300
}

/// Settling parameters for guide and dither commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleParams {
    #[serde(default = "default_settle_pixels")]
    pub pixels: f64,
    #[serde(default = "default_settle_time")]
    pub time: u32,
    #[serde(default = "default_settle_timeout")]
    pub timeout: u32,
}

impl Default for SettleParams {
    fn default() -> Self {
        Self {
            pixels: default_settle_pixels(),
            time: default_settle_time(),
            timeout: default_settle_timeout(),
        }
    }
}

fn default_settle_pixels() -> f64 {
    1.5
}

fn default_settle_time() -> u32 {
    10
}

fn default_settle_timeout() -> u32 {
    40
}

/// Load configuration from a JSON file
pub fn load_config(path: &PathBuf) -> std::result::Result<Config, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}
