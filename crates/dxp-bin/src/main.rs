//! CLI Entry Point for Xerxes
//!
//! Drives the configuration registry and acquisition orchestrator against
//! simulated DXP hardware:
//! - `check`: parse the system and modules files, print the built system
//! - `setup`: full bring-up including firmware downloads and ASC setup
//! - `run`: timed run on every module, then per-channel spectrum totals
//! - `symbols`: DSP parameter table of one detector channel
//!
//! # Usage
//!
//! ```bash
//! xerxes-sim check xia.cfg
//! xerxes-sim run xia.cfg --seconds 5 --gate 1
//! xerxes-sim -v symbols xia.cfg 0
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use dxp_core::{DetChan, ParamAccess};
use dxp_driver_mock::{catalogs, MockConfig, MockHardware};
use dxp_hardware::{load_settings, SharedSystem, System};
use serde_json::json;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "xerxes-sim")]
#[command(about = "XIA DXP configuration and acquisition on simulated hardware", long_about = None)]
struct Cli {
    /// Settings file (TOML). Defaults to <config dir>/xerxes/settings.toml
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse the configuration and print the resulting system as JSON
    Check {
        /// System configuration file
        config: String,
    },

    /// Bring the system up: firmware, parameter defaults and ASC
    Setup {
        /// System configuration file
        config: String,
    },

    /// Run every module for a fixed time and report spectrum totals
    Run {
        /// System configuration file
        config: String,

        /// Run length
        #[arg(long, default_value = "1")]
        seconds: u64,

        /// Gate mode passed to the boards (default: each module's last gate)
        #[arg(long)]
        gate: Option<u16>,

        /// Status poll interval
        #[arg(long, default_value = "100")]
        poll_ms: u64,
    },

    /// List the DSP parameters of one detector channel
    Symbols {
        /// System configuration file
        config: String,

        /// Detector channel id
        det_chan: DetChan,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let system = build_system(cli.settings.as_deref())?;

    match cli.command {
        Commands::Check { config } => check(system, &config),
        Commands::Setup { config } => setup(system, &config),
        Commands::Run {
            config,
            seconds,
            gate,
            poll_ms,
        } => run(system, &config, Duration::from_secs(seconds), gate, Duration::from_millis(poll_ms)).await,
        Commands::Symbols { config, det_chan } => symbols(system, &config, det_chan),
    }
}

/// System wired to a fresh simulated crate.
fn build_system(settings: Option<&std::path::Path>) -> Result<System> {
    let settings = load_settings(settings)?;
    let hardware = MockHardware::new(MockConfig::default());
    let (drivers, transports) = catalogs(&hardware);
    Ok(System::new(settings, drivers, transports))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn check(mut system: System, config: &str) -> Result<()> {
    system
        .read_config(config)
        .with_context(|| format!("Failed to read {}", config))?;
    system.assign_channel().context("Failed to build modules")?;
    print_json(&serde_json::to_value(system.summary())?)
}

fn setup(mut system: System, config: &str) -> Result<()> {
    system
        .initialize(config)
        .with_context(|| format!("Failed to initialize from {}", config))?;
    print_json(&serde_json::to_value(system.summary())?)
}

async fn run(
    mut system: System,
    config: &str,
    length: Duration,
    gate: Option<u16>,
    poll: Duration,
) -> Result<()> {
    system
        .initialize(config)
        .with_context(|| format!("Failed to initialize from {}", config))?;
    let shared = SharedSystem::new(system);
    shared.with(|s| s.start_run(gate, false))?;
    info!(seconds = length.as_secs_f64(), ?gate, "run started");

    let deadline = Instant::now() + length;
    let mut ticker = tokio::time::interval(poll);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = signal::ctrl_c() => {
                warn!("interrupted, stopping run");
                break;
            }
        }
        let poller = shared.clone();
        let (det, status) = tokio::task::spawn_blocking(move || poller.with(|s| s.isrunning_any()))
            .await
            .context("Status poll panicked")??;
        debug!(?det, ?status, "run status");
        if status.is_empty() {
            warn!("run ended before the requested time");
            break;
        }
        if Instant::now() >= deadline {
            break;
        }
    }

    let worker = shared.clone();
    let channels = tokio::task::spawn_blocking(move || {
        worker.with(|s| -> Result<Vec<serde_json::Value>> {
            s.stop_run()?;
            let mut channels = Vec::new();
            for det in s.get_detectors()? {
                let readout = s.readout_detector_run(det)?;
                channels.push(json!({
                    "det_chan": det,
                    "nspec": readout.spectrum.len(),
                    "nbase": readout.baseline.len(),
                    "total_counts": readout.total_counts(),
                }));
            }
            Ok(channels)
        })
    })
    .await
    .context("Readout panicked")??;
    info!(channels = channels.len(), "run stopped and read out");
    print_json(&json!({ "channels": channels }))
}

fn symbols(mut system: System, config: &str, det: DetChan) -> Result<()> {
    system
        .initialize(config)
        .with_context(|| format!("Failed to initialize from {}", config))?;
    let names = system.symbolname_list(det)?;
    let limits = system.symbolname_limits(det)?;
    println!("{:<16} {:<6} {:>6} {:>6} {:>8}", "NAME", "ACCESS", "LOWER", "UPPER", "VALUE");
    for (name, limit) in names.iter().zip(&limits) {
        let access = match (
            limit.access.contains(ParamAccess::READ),
            limit.access.contains(ParamAccess::WRITE),
        ) {
            (true, true) => "rw",
            (true, false) => "r",
            (false, true) => "w",
            (false, false) => "-",
        };
        let value = if limit.access.contains(ParamAccess::READ) {
            system.get_dspsymbol(det, name)?.to_string()
        } else {
            "-".to_string()
        };
        println!(
            "{:<16} {:<6} {:>6} {:>6} {:>8}",
            name, access, limit.lower, limit.upper, value
        );
    }
    Ok(())
}
