//! gems-fleet CLI.
//!
//! # Usage
//!
//! ```bash
//! # Push a configuration to a fleet and verify it
//! gems-fleet update --config config.json --devices devices.txt
//!
//! # Validate inputs and show the expected UIDs without touching devices
//! gems-fleet update --config config.json --devices devices.txt --dry-run
//!
//! # Decode UIDs reported by a device
//! gems-fleet decode-uid --system 0x012C1A54 --sensor 0x00300010
//! ```
//!
//! # Environment Variables
//!
//! - `PARTICLE_ACCESS_TOKEN`: bearer token for the cloud gateway
//! - `RUST_LOG`: logging level (default: info)

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use gems_fleet::audit::{AuditLogger, RunParameters};
use gems_fleet::codec;
use gems_fleet::config::{parse_config_input, parse_device_input, UpdateSettings};
use gems_fleet::results::save_results;
use gems_fleet::{FleetOrchestrator, ParticleSessionFactory};

#[derive(Parser, Debug)]
#[command(name = "gems-fleet")]
#[command(about = "Bulk configuration deployment for GEMS sensing device fleets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Update configurations on a fleet of devices and verify each one
    Update(UpdateArgs),
    /// Decode configuration UIDs into their component fields
    DecodeUid(DecodeUidArgs),
}

#[derive(clap::Args, Debug)]
struct UpdateArgs {
    /// Path to configuration JSON file OR inline JSON string
    #[arg(long)]
    config: String,

    /// Path to device list file OR comma/space separated device IDs
    #[arg(long)]
    devices: String,

    /// Output file for the JSON results document
    #[arg(long, default_value = "update_results.json")]
    output: PathBuf,

    /// Particle access token
    #[arg(long, env = "PARTICLE_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Maximum retry attempts per device
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Seconds to wait for device restart
    #[arg(long, default_value_t = 30)]
    restart_wait: u64,

    /// Seconds to wait for a device to come back online
    #[arg(long, default_value_t = 120)]
    online_timeout: u64,

    /// Read-back attempts during UID verification
    #[arg(long, default_value_t = 5)]
    uid_check_retries: u32,

    /// Maximum concurrent devices to process
    #[arg(long, default_value_t = 5)]
    max_concurrent: usize,

    /// Validate inputs and compute UIDs without contacting any device
    #[arg(long)]
    dry_run: bool,

    /// Skip writing/committing the audit run record
    #[arg(long)]
    no_audit_log: bool,

    /// Note about what this update is for (recorded in the audit log)
    #[arg(long)]
    note: Option<String>,
}

#[derive(clap::Args, Debug)]
struct DecodeUidArgs {
    /// System configuration UID (decimal or 0x hex)
    #[arg(long)]
    system: Option<String>,

    /// Sensor configuration UID (decimal or 0x hex)
    #[arg(long)]
    sensor: Option<String>,
}

async fn run_update(args: UpdateArgs) -> Result<i32> {
    let document = parse_config_input(&args.config).context("loading configuration")?;
    let device_ids = parse_device_input(&args.devices).context("loading device list")?;
    info!(devices = device_ids.len(), "Loaded configuration and device list");

    let expected_system = codec::encode_system_uid(&document.config.system);
    let expected_sensor = codec::encode_sensor_uid(&document.config.sensors);

    if args.dry_run {
        info!("DRY RUN MODE - No changes will be made");
        println!("Would update {} devices with configuration:", device_ids.len());
        println!("{}", document.to_pretty_json());
        println!();
        println!("{}", codec::format_system_uid(expected_system));
        println!();
        println!("{}", codec::format_sensor_uid(expected_sensor));
        println!();
        println!("Device IDs:");
        for device_id in &device_ids {
            println!("  - {device_id}");
        }
        println!("Would use {} concurrent workers", args.max_concurrent);
        return Ok(0);
    }

    let token = args
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .context("PARTICLE_ACCESS_TOKEN not set and --token not given")?;

    let settings = UpdateSettings {
        max_retries: args.max_retries,
        restart_wait_secs: args.restart_wait,
        online_timeout_secs: args.online_timeout,
        uid_check_retries: args.uid_check_retries,
        max_concurrent_devices: args.max_concurrent,
    };

    let orchestrator =
        FleetOrchestrator::new(ParticleSessionFactory::new(token), settings);
    let results = orchestrator.run(&document, &device_ids).await;

    save_results(&results, &args.output)
        .with_context(|| format!("saving results to {}", args.output.display()))?;

    if !args.no_audit_log {
        let parameters = RunParameters {
            config_source: args.config.clone(),
            device_source: args.devices.clone(),
            max_retries: args.max_retries,
            restart_wait_secs: args.restart_wait,
            online_timeout_secs: args.online_timeout,
            max_concurrent_devices: args.max_concurrent,
            note: args.note.clone(),
        };
        AuditLogger::new().record_run(&parameters, &results);
    }

    if results.all_succeeded() {
        info!("All devices updated successfully");
        Ok(0)
    } else {
        error!(
            failed = results.summary.failed,
            total = results.summary.total_devices,
            "Some devices failed to update"
        );
        Ok(1)
    }
}

fn run_decode_uid(args: DecodeUidArgs) -> Result<()> {
    if args.system.is_none() && args.sensor.is_none() {
        anyhow::bail!("Provide --system and/or --sensor UID to decode");
    }
    if let Some(system) = &args.system {
        let uid = codec::parse_uid(system).map_err(anyhow::Error::msg)?;
        println!("{}", codec::format_system_uid(uid));
    }
    if let Some(sensor) = &args.sensor {
        if args.system.is_some() {
            println!();
        }
        let uid = codec::parse_uid(sensor).map_err(anyhow::Error::msg)?;
        println!("{}", codec::format_sensor_uid(uid));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Command::Update(args) => run_update(args).await?,
        Command::DecodeUid(args) => {
            run_decode_uid(args)?;
            0
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
