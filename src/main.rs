use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use deckcore::{
    config::{Config, DeviceConfig},
    device::DeviceManager,
    Deck,
};

#[derive(Parser, Debug)]
#[command(name = "deckcore")]
#[command(about = "Device communication core for AJAZZ/Mirabox control surfaces")]
#[command(version)]
struct Cli {
    /// Check device connection status and exit
    #[arg(long)]
    status: bool,

    /// Set device brightness (0-100)
    #[arg(long, value_name = "PERCENT")]
    brightness: Option<u8>,

    /// Upload a pre-encoded image file to an LCD button
    #[arg(long, value_name = "PATH", requires = "button")]
    image: Option<PathBuf>,

    /// Target LCD button for --image (0-5)
    #[arg(long, value_name = "KEY", requires = "image")]
    button: Option<u8>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Handle one-shot commands first
    if cli.status {
        return check_status();
    }

    if let Some(percent) = cli.brightness {
        return set_brightness(percent);
    }

    if let (Some(path), Some(key)) = (cli.image, cli.button) {
        return upload_image(&path, key);
    }

    // Load configuration
    let config = Config::load()?;

    info!("Starting deckcore");

    let mut deck = Deck::open(config).await?;

    // Set up signal handlers for graceful shutdown
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            event = deck.next_event() => match event {
                Some(event) => info!("Event: {:?}", event),
                None => break,
            },
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
        }
    }

    deck.shutdown();
    Ok(())
}

fn check_status() -> Result<()> {
    info!("Checking device status...");

    match DeviceManager::find_device() {
        Ok(info) => {
            println!("✓ Device found: {} {}", info.manufacturer, info.product);
            if !info.serial_number.is_empty() {
                println!("  Serial: {}", info.serial_number);
            }
            Ok(())
        }
        Err(e) => {
            println!("✗ No device found: {}", e);
            std::process::exit(1);
        }
    }
}

/// One-shot connection for CLI commands; no background retries
fn one_shot_manager() -> Result<(DeviceManager, mpsc::UnboundedReceiver<deckcore::device::RawEventRecord>)> {
    let (record_tx, record_rx) = mpsc::unbounded_channel();
    let config = DeviceConfig {
        auto_reconnect: false,
        ..Default::default()
    };
    let manager = DeviceManager::new(config, record_tx)?;
    manager.connect()?;
    Ok((manager, record_rx))
}

fn set_brightness(percent: u8) -> Result<()> {
    info!("Setting brightness to {}%", percent);

    let (manager, _records) = one_shot_manager()?;
    manager.set_brightness(percent)?;
    println!("✓ Brightness set to {}%", percent);
    manager.disconnect();
    Ok(())
}

fn upload_image(path: &Path, key: u8) -> Result<()> {
    let data = std::fs::read(path)?;
    info!("Uploading {} ({} bytes) to LCD button {}", path.display(), data.len(), key);

    let (manager, _records) = one_shot_manager()?;
    manager.upload_image(key, &data)?;
    println!("✓ Uploaded {} bytes to LCD button {}", data.len(), key);
    manager.disconnect();
    Ok(())
}
