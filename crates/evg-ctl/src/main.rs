//! Operator tool for VME-EVG230 timing event generators reached over a UDP
//! register gateway. Loads a JSON device inventory, brings the devices up,
//! and runs one operation against a named device.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use evg_driver::{CardRevision, DeviceConfig, DriverConfig, EvgDriver, ResetPolicy};
use serde::Deserialize;
use tracing::warn;

#[derive(Parser)]
#[command(name = "evg-ctl", about = "Operate VME-EVG230 timing event generators")]
struct Cli {
    /// Path to the device inventory (JSON).
    #[arg(long, default_value = "devices.json")]
    inventory: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print one line per configured device: name, IP, port.
    Report,
    /// Master-enable a device (or disable it with --off).
    Enable {
        device: String,
        #[arg(long)]
        off: bool,
    },
    /// Read the firmware version register.
    Firmware { device: String },
    /// Broadcast a one-shot software event code.
    SoftwareEvent { device: String, code: u8 },
    /// Run the card-reset sequence: master disable, sequencers off,
    /// end-of-sequence code at RAM address 0.
    Reset { device: String },
}

#[derive(Debug, Deserialize)]
struct Inventory {
    devices: Vec<InventoryDevice>,
}

#[derive(Debug, Deserialize)]
struct InventoryDevice {
    name: String,
    ip: String,
    port: u16,
    frequency_hz: u32,
    /// "evg230" (dual sequencer, default) or "evg200" (single).
    #[serde(default)]
    revision: Option<String>,
    /// Master-disable the card during init. Defaults to true.
    #[serde(default)]
    reset_on_init: Option<bool>,
}

fn load_inventory(path: &Path) -> anyhow::Result<Vec<DeviceConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read inventory {}", path.display()))?;
    let inventory: Inventory = serde_json::from_str(&raw)
        .with_context(|| format!("parse inventory {}", path.display()))?;

    inventory
        .devices
        .into_iter()
        .map(|entry| {
            let ip = entry
                .ip
                .parse()
                .with_context(|| format!("device {:?}: bad IP {:?}", entry.name, entry.ip))?;
            let mut config = DeviceConfig::new(entry.name.clone(), ip, entry.port, entry.frequency_hz);
            config.revision = match entry.revision.as_deref() {
                None | Some("evg230") => CardRevision::Evg230,
                Some("evg200") => CardRevision::Evg200,
                Some(other) => {
                    bail!("device {:?}: unknown revision {other:?}", entry.name)
                }
            };
            if entry.reset_on_init == Some(false) {
                config.reset = ResetPolicy::None;
            }
            Ok(config)
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut driver = EvgDriver::new(DriverConfig::from_env()?);
    for config in load_inventory(&cli.inventory)? {
        driver.configure(config)?;
    }

    // The report is pure bookkeeping; skip the init traffic for it.
    if matches!(cli.command, Command::Report) {
        print!("{}", driver.report());
        return Ok(());
    }

    for failure in driver.init() {
        warn!(device = %failure.device, error = %failure.error, "device failed to initialize");
    }

    match &cli.command {
        Command::Report => unreachable!("handled above"),
        Command::Enable { device, off } => {
            driver.open(device)?.enable(!off)?;
        }
        Command::Firmware { device } => {
            let version = driver.open(device)?.get_firmware_version()?;
            println!("{version:#06x}");
        }
        Command::SoftwareEvent { device, code } => {
            driver.open(device)?.set_software_event(*code)?;
        }
        Command::Reset { device } => {
            driver.open(device)?.reset()?;
        }
    }

    driver.shutdown();
    Ok(())
}
