//! mixbridge - drive PulseAudio stream volume and mute from a MIDI surface

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mixbridge::config::AppConfig;
use mixbridge::hotplug::{DeviceNodeWatcher, HotplugSource};
use mixbridge::mixer::{Mixer, PactlBackend};
use mixbridge::paths;
use mixbridge::surface::{ControlSurfaceLink, MidiBackend, MidirBackend};
use mixbridge::sync::SyncLoop;

/// Bridge a MIDI fader/button surface to PulseAudio per-stream volume and mute
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "MIXBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Exact MIDI device name (overrides device.name)
    #[arg(short, long)]
    device: Option<String>,

    /// Number of physical channels (overrides device.channels)
    #[arg(long)]
    channels: Option<usize>,

    /// Gain at full slider travel, e.g. 1.5 (enables boost)
    #[arg(long)]
    boost: Option<f32>,

    /// Log every surface event and mixer action
    #[arg(short, long)]
    verbose: bool,

    /// List available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.verbose)?;

    if args.list_ports {
        return list_ports();
    }

    info!("Starting mixbridge v{}...", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args).await?;
    info!(
        "Surface '{}' ({} channels), boost {}",
        config.device.name,
        config.device.channels,
        config
            .mixer
            .boost
            .map(|gain| format!("x{:.2}", gain))
            .unwrap_or_else(|| "off".to_string())
    );

    let link = ControlSurfaceLink::new(
        Box::new(MidirBackend::new(config.mixer.client_label.clone())),
        &config.device,
    );
    let mixer = Mixer::new(Box::new(PactlBackend::new()), &config.mixer);
    let hotplug = start_hotplug(&config);

    let mut sync = SyncLoop::new(link, mixer, hotplug, config);

    let outcome = tokio::select! {
        result = sync.run() => result.context("Sync loop stopped"),
        _ = shutdown_signal() => Ok(()),
    };

    sync.shutdown();
    outcome?;

    info!("mixbridge shutdown complete");
    Ok(())
}

/// Config file (or defaults) with command-line overrides applied
async fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match paths::find_config(args.config.as_deref()) {
        Some(path) => {
            info!("Configuration file: {}", path.display());
            AppConfig::load(&path).await?
        }
        None => {
            info!("No configuration file found, using defaults");
            AppConfig::default()
        }
    };

    if let Some(device) = &args.device {
        config.device.name = device.clone();
    }
    if let Some(channels) = args.channels {
        config.device.channels = channels;
    }
    if args.boost.is_some() {
        config.mixer.boost = args.boost;
    }
    config.verbose |= args.verbose;

    config.validate().context("Invalid configuration after command-line overrides")?;
    Ok(config)
}

/// Hotplug hints are optional; failures only cost reconnect latency
fn start_hotplug(config: &AppConfig) -> Option<Box<dyn HotplugSource>> {
    if !config.hotplug.enabled {
        info!("Hotplug watcher disabled");
        return None;
    }
    match DeviceNodeWatcher::new(&config.hotplug) {
        Ok(watcher) => Some(Box::new(watcher)),
        Err(e) => {
            warn!("Hotplug watcher unavailable, relying on periodic retries: {}", e);
            None
        }
    }
}

fn list_ports() -> Result<()> {
    let backend = MidirBackend::new("mixbridge-list");
    let ports = backend.ports().context("Failed to enumerate MIDI ports")?;

    println!("\nMIDI input ports:");
    for port in ports.iter().filter(|p| p.is_input) {
        println!("  [{}] {}", port.id, port.name);
    }
    println!("\nMIDI output ports:");
    for port in ports.iter().filter(|p| p.is_output) {
        println!("  [{}] {}", port.id, port.name);
    }
    println!();
    Ok(())
}

fn init_logging(level: &str, verbose: bool) -> Result<()> {
    let default_directive = if verbose {
        format!("{},mixbridge=debug", level)
    } else {
        level.to_string()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
