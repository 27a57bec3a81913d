use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use log::{Level, info, warn};

use ble_explorer_lib::config::{AppConfig, CONFIG_FILE_NAME};
use ble_explorer_lib::core::BluetoothManager;
use ble_explorer_lib::core::bluetooth::AdapterState;
use ble_explorer_lib::logging::ChannelLogger;
use ble_explorer_lib::state::AppState;
use ble_explorer_lib::view;

/// Discover and inspect nearby Bluetooth Low Energy peripherals
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path of the JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    /// Log debug messages
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan and list the peripherals found
    Scan,
    /// Scan, then connect to a peripheral and show its details
    Connect { id: String },
    /// Write the effective configuration to the config file
    InitConfig,
}

async fn scan_to_completion(manager: &BluetoothManager, scan_duration: Duration) {
    manager.press_scan_button().await;
    let deadline = tokio::time::Instant::now() + scan_duration + Duration::from_secs(5);
    while manager.is_scanning() {
        if tokio::time::Instant::now() > deadline {
            warn!("Adapter did not report the end of the scan");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::Debug } else { Level::Info };
    if ChannelLogger::init(level).is_err() {
        // Only fall back to env_logger if the channel logger could not be installed
        env_logger::builder()
            .filter_level(level.to_level_filter())
            .init();
    }

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    let config = AppConfig::load_config(&config_path).await?;
    let target = match cli.command {
        Command::InitConfig => return config.save_config(&config_path).await,
        Command::Scan => None,
        Command::Connect { id } => Some(id),
    };

    let app_state = AppState::new(config).await?;
    let manager = app_state.get_bluetooth_manager_arc();
    let listener = manager.start().await;

    if manager.bt_state() != AdapterState::On {
        info!("{}", view::scan_button_label(manager.bt_state(), false));
        if manager.enable_bluetooth().await != AdapterState::On {
            bail!("Bluetooth is not available");
        }
    }

    let scan_duration = app_state.config.scan.scan_options().duration;
    info!("{}", view::scan_button_label(manager.bt_state(), true));
    scan_to_completion(&manager, scan_duration).await;

    match target {
        None => {
            let peripherals = manager.peripherals();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&peripherals)?);
            } else {
                println!("{}", view::render_list(&peripherals));
            }
        }
        Some(id) => {
            let Some(info) = manager.toggle_connection(&id).await else {
                listener.stop().await;
                bail!("Could not connect to {}", id);
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print!("{}", view::render_details(&info));
            }
            // Failures are logged by the manager
            let _ = manager.disconnect_peripheral(&id).await;
        }
    }

    listener.stop().await;
    Ok(())
}
