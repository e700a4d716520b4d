//! Simulation runner.
//!
//! # Usage
//!
//! ```bash
//! # Three devices, 250 contacts
//! mdsync-sim
//!
//! # Five devices, small transactions, another seed
//! mdsync-sim --devices 5 --contacts 1000 --chunk-size 50 --seed 7
//! ```

use std::time::Duration;

use clap::Parser;
use mdsync_harness::{MediatorConfig, ScenarioConfig, run_scenario};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Multi-device sync simulation
#[derive(Parser, Debug)]
#[command(name = "mdsync-sim")]
#[command(about = "Deterministic multi-device mediator sync simulation")]
#[command(version)]
struct Args {
    /// Devices in the group
    #[arg(short, long, default_value = "3")]
    devices: usize,

    /// Contacts created and synced by the first device
    #[arg(short, long, default_value = "250")]
    contacts: usize,

    /// Contacts per transaction
    #[arg(long, default_value = "100")]
    chunk_size: usize,

    /// Device slots at the mediator
    #[arg(long, default_value = "4")]
    max_device_slots: u32,

    /// Simulation seed
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Virtual seconds devices wait for each other
    #[arg(long, default_value = "120")]
    deadline_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ScenarioConfig {
        devices: args.devices,
        contacts: args.contacts,
        seed: args.seed,
        chunk_size: args.chunk_size,
        mediator: MediatorConfig {
            max_device_slots: args.max_device_slots.max(u32::try_from(args.devices)?),
            ..MediatorConfig::default()
        },
        deadline: Duration::from_secs(args.deadline_secs),
    };
    tracing::info!(
        devices = config.devices,
        contacts = config.contacts,
        seed = config.seed,
        "starting simulation"
    );

    let report = run_scenario(&config)?;
    for line in report.to_string().lines() {
        tracing::info!("{line}");
    }

    if !report.converged() {
        return Err("devices did not converge".into());
    }
    Ok(())
}
