use clap::{Parser, Subcommand};
use nocturne_guider::{
    load_config, GuiderClient, GuiderConfig, GuiderNotification, ShiftRate,
};
use std::path::PathBuf;
use tracing::{debug, info, warn, Level};

#[derive(Parser)]
#[command(name = "nocturne-guider")]
#[command(about = "Autoguider client for Nocturne")]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Guider host address
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Guider port
    #[arg(long, default_value = "4400")]
    port: u16,

    /// Log level
    #[arg(short, long, default_value = "info", value_parser = clap::value_parser!(Level))]
    log_level: Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the guider and show status
    Status,

    /// Connect to the guider and monitor notifications
    Monitor,

    /// List available profiles
    Profiles,

    /// Start guiding
    Guide {
        /// Discard calibration and recalibrate before guiding
        #[arg(long)]
        recalibrate: bool,

        /// Return before settling has completed
        #[arg(long)]
        no_wait_settle: bool,
    },

    /// Stop guiding
    Stop,

    /// Dither the guide position
    Dither,

    /// Pause guide corrections
    Pause,

    /// Resume guide corrections after a pause
    Resume,

    /// Clear mount and AO calibration data
    ClearCalibration,

    /// Apply a constant lock-position drift
    ShiftRate {
        /// RA rate in arcsec/hour
        ra: f64,

        /// Dec rate in arcsec/hour
        dec: f64,
    },

    /// Disable lock-position shifting
    StopShifting,

    /// Let the guider pick a guide star
    SelectStar,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    debug!(
        "Parsed command line arguments: host={}, port={}, log_level={:?}",
        args.host, args.port, args.log_level
    );

    // Build configuration from CLI args or config file
    let guider_config = if let Some(config_path) = &args.config {
        debug!("Loading configuration from {:?}", config_path);
        let config = load_config(config_path)?;
        config.guider
    } else {
        GuiderConfig {
            host: args.host,
            port: args.port,
            ..Default::default()
        }
    };

    let client = GuiderClient::new(guider_config);

    match args.command {
        Commands::Status => {
            run_status(&client).await?;
        }
        Commands::Monitor => {
            run_monitor(&client).await?;
        }
        Commands::Profiles => {
            run_profiles(&client).await?;
        }
        Commands::Guide {
            recalibrate,
            no_wait_settle,
        } => {
            run_guide(&client, recalibrate, !no_wait_settle).await?;
        }
        Commands::Stop => {
            run_stop(&client).await?;
        }
        Commands::Dither => {
            run_dither(&client).await?;
        }
        Commands::Pause => {
            run_pause(&client, true).await?;
        }
        Commands::Resume => {
            run_pause(&client, false).await?;
        }
        Commands::ClearCalibration => {
            run_clear_calibration(&client).await?;
        }
        Commands::ShiftRate { ra, dec } => {
            run_shift_rate(&client, ra, dec).await?;
        }
        Commands::StopShifting => {
            run_stop_shifting(&client).await?;
        }
        Commands::SelectStar => {
            run_select_star(&client).await?;
        }
    }

    Ok(())
}

async fn run_status(client: &GuiderClient) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to guider...");
    client.connect().await?;

    // Wait a moment for the Version event
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    if let Some(version) = client.server_version().await {
        info!("Guider version: {}", version);
    }

    match client.app_state().await {
        Some(state) => info!("Guider state: {}", state),
        None => info!("Guider state: unknown"),
    }

    let connected = client.get_connected().await?;
    info!("Equipment connected: {}", connected);

    if connected {
        let profile = client.get_profile().await?;
        info!("Current profile: {} (id: {})", profile.name, profile.id);
        info!("Pixel scale: {:.3} arcsec/px", client.pixel_scale().await);

        let shift_lock = client.shift_lock().await;
        if shift_lock.enabled {
            info!(
                "Lock shift: {:.4}/{:.4} deg/hr ({})",
                shift_lock.ra_deg_per_hour, shift_lock.dec_deg_per_hour, shift_lock.axes
            );
        }
    }

    client.disconnect().await?;
    Ok(())
}

async fn run_monitor(client: &GuiderClient) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to guider...");
    client.connect().await?;

    info!("Monitoring guider (press Ctrl+C to stop)...");

    let mut receiver = client.subscribe();

    loop {
        tokio::select! {
            notification = receiver.recv() => {
                match notification {
                    Ok(notification) => {
                        if !print_notification(&notification) {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Notification receiver error: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}

/// Returns false once monitoring should stop
fn print_notification(notification: &GuiderNotification) -> bool {
    match notification {
        GuiderNotification::GuideStep(stats) => {
            info!(
                "GuideStep - Frame {} dx={:.2} dy={:.2} SNR={:.1}",
                stats.frame,
                stats.dx,
                stats.dy,
                stats.snr.unwrap_or(0.0)
            );
            true
        }
        GuiderNotification::Warning(message) => {
            warn!("Warning: {}", message);
            true
        }
        GuiderNotification::Error(message) => {
            warn!("Error: {}", message);
            true
        }
        GuiderNotification::ConnectionLost => {
            warn!("Connection to guider lost");
            false
        }
    }
}

async fn run_profiles(client: &GuiderClient) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to guider...");
    client.connect().await?;

    let profiles = client.get_profiles().await?;
    info!("Available profiles:");
    for profile in &profiles {
        info!("  [{}] {}", profile.id, profile.name);
    }

    let current = client.get_profile().await?;
    info!("Current profile: {} (id: {})", current.name, current.id);

    client.disconnect().await?;
    Ok(())
}

async fn run_guide(
    client: &GuiderClient,
    recalibrate: bool,
    wait_for_settle: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to guider...");
    client.connect().await?;

    info!(
        "Starting guiding (recalibrate={}, wait_for_settle={})",
        recalibrate, wait_for_settle
    );
    if client.start_guiding(recalibrate, wait_for_settle).await? {
        info!("Guiding started");
    } else {
        warn!("Guiding did not start");
    }

    client.disconnect().await?;
    Ok(())
}

async fn run_stop(client: &GuiderClient) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to guider...");
    client.connect().await?;

    info!("Stopping guiding...");
    if client.stop_guiding().await? {
        info!("Guiding stopped");
    } else {
        info!("Nothing to stop");
    }

    client.disconnect().await?;
    Ok(())
}

async fn run_dither(client: &GuiderClient) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to guider...");
    client.connect().await?;

    info!("Dithering...");
    if client.dither().await? {
        info!("Dither settled");
    } else {
        warn!("Dither was skipped");
    }

    client.disconnect().await?;
    Ok(())
}

async fn run_pause(client: &GuiderClient, paused: bool) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to guider...");
    client.connect().await?;

    if paused {
        info!("Pausing guiding...");
    } else {
        info!("Resuming guiding...");
    }
    if client.set_paused(paused).await? {
        info!("Done");
    } else {
        warn!("Command was not honored");
    }

    client.disconnect().await?;
    Ok(())
}

async fn run_clear_calibration(client: &GuiderClient) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to guider...");
    client.connect().await?;

    info!("Clearing calibration...");
    if client.clear_calibration().await? {
        info!("Calibration cleared");
    }

    client.disconnect().await?;
    Ok(())
}

async fn run_shift_rate(
    client: &GuiderClient,
    ra: f64,
    dec: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to guider...");
    client.connect().await?;

    info!("Applying lock shift rate ra={} dec={} arcsec/hr", ra, dec);
    if client.set_shift_rate(ShiftRate::new(ra, dec)).await? {
        info!("Lock shift enabled");
    } else {
        warn!("Lock shift could not be enabled");
    }

    client.disconnect().await?;
    Ok(())
}

async fn run_stop_shifting(client: &GuiderClient) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to guider...");
    client.connect().await?;

    info!("Disabling lock shift...");
    if client.stop_shifting().await? {
        info!("Lock shift disabled");
    }

    client.disconnect().await?;
    Ok(())
}

async fn run_select_star(client: &GuiderClient) -> Result<(), Box<dyn std::error::Error>> {
    info!("Connecting to guider...");
    client.connect().await?;

    info!("Selecting a guide star...");
    if client.auto_select_guide_star().await? {
        if let Some((x, y)) = client.get_lock_position().await? {
            info!("Guide star selected at ({:.1}, {:.1})", x, y);
        } else {
            info!("Guide star selected");
        }
    } else {
        warn!("No guide star selected");
    }

    client.disconnect().await?;
    Ok(())
}
