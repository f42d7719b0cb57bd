//! Client for PHD2-compatible autoguider services.
//!
//! Talks line-delimited JSON over TCP: commands go out one connection per
//! call through [`channel::RequestChannel`], while a single long-lived
//! connection feeds server events into a session state machine. The
//! [`GuiderClient`] composes both into imaging-session workflows: connect,
//! start/stop guiding, dither, pause/resume, shift-lock tracking, and
//! guide-star selection.
//!
//! ```no_run
//! use nocturne_guider::{GuiderClient, GuiderConfig};
//!
//! # async fn run() -> nocturne_guider::Result<()> {
//! let client = GuiderClient::new(GuiderConfig::default());
//! client.connect().await?;
//! client.start_guiding(false, true).await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod io;
mod listener;
pub mod process;
pub mod session;
pub mod state;
pub mod wire;

pub use config::{load_config, Config, GuiderConfig, SettleParams};
pub use error::{GuiderError, Result};
pub use events::{AppState, GuideStepStats, ServerEvent};
pub use process::GuiderProcessManager;
pub use session::{GuiderClient, GuiderNotification};
pub use state::{Profile, Rect, SessionState, ShiftLockState, ShiftRate};
