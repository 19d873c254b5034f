//! nextgsim multi-UE tester
//!
//! Runs a fleet of emulated UEs through registration, PDU session
//! establishment, handover and deregistration, optionally provisioning a
//! gtp5g tunnel for each registered UE.
//!
//! # Usage
//!
//! ```bash
//! nr-tester --num-ues 10 --time-before-deregistration 5000
//! nr-tester -c config/tester.yaml --num-ues 4 --dedicated-gnb --tunnel
//! nr-tester --num-ues 2 --loop --time-before-handover 1000
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use nextgsim_common::{init_logging, LogLevel, TesterConfig};
use nextgsim_gtp::{CommandNetworking, TunnelConfigurator};
use nextgsim_tester::{RunReport, Scenario, ScenarioConfig, MAX_UES};
use nextgsim_ue::LoopbackEngine;

/// nextgsim tester - multi-UE load and conformance tester
#[derive(Parser, Debug)]
#[command(name = "nr-tester")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the tester configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config_file: Option<String>,

    /// Number of UEs to emulate (1-512)
    #[arg(short = 'n', long = "num-ues", value_name = "NUM", default_value_t = 1)]
    num_ues: u32,

    /// Provision a gtp5g tunnel per registered UE (requires --dedicated-gnb)
    #[arg(long = "tunnel")]
    tunnel: bool,

    /// Give every UE its own gNB
    #[arg(long = "dedicated-gnb")]
    dedicated_gnb: bool,

    /// Repeat waves until interrupted
    #[arg(long = "loop")]
    loop_waves: bool,

    /// Delay between two UE spawns in milliseconds
    #[arg(long = "time-between-registration", value_name = "MS", default_value_t = 500)]
    time_between_registration: u64,

    /// Deregister each UE this long after its spawn (0 disables)
    #[arg(long = "time-before-deregistration", value_name = "MS", default_value_t = 0)]
    time_before_deregistration: u64,

    /// Hand each UE over this long after its spawn (0 disables)
    #[arg(long = "time-before-handover", value_name = "MS", default_value_t = 0)]
    time_before_handover: u64,

    /// PDU sessions requested by each UE once registered (0-16)
    #[arg(long = "num-pdu-sessions", value_name = "NUM", default_value_t = 1)]
    num_pdu_sessions: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,
}

/// Parsed CLI options
#[derive(Debug, Clone)]
pub struct TesterOptions {
    /// Path to configuration file
    pub config_file: Option<String>,
    /// Scenario flags; identities are filled in from the configuration
    pub scenario: ScenarioConfig,
}

impl TryFrom<Args> for TesterOptions {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self> {
        if args.num_ues == 0 {
            bail!("Number of UEs must be at least 1");
        }
        if args.num_ues > MAX_UES {
            bail!("Number of UEs cannot exceed {MAX_UES}");
        }

        Ok(TesterOptions {
            config_file: args.config_file,
            scenario: ScenarioConfig {
                num_ues: args.num_ues,
                tunnel_enabled: args.tunnel,
                dedicated_gnb: args.dedicated_gnb,
                loop_waves: args.loop_waves,
                time_between_registration_ms: args.time_between_registration,
                time_before_deregistration_ms: args.time_before_deregistration,
                time_before_handover_ms: args.time_before_handover,
                num_pdu_sessions: args.num_pdu_sessions,
                ..Default::default()
            },
        })
    }
}

fn load_config(path: Option<&str>) -> Result<TesterConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {path}");
            TesterConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load configuration file: {path}"))
        }
        None => {
            info!("No configuration file given, using defaults");
            Ok(TesterConfig::default())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level);

    println!("nextgsim tester - Multi-UE 5G Tester");
    println!("====================================");

    let options = match TesterOptions::try_from(args) {
        Ok(opts) => opts,
        Err(e) => {
            error!("Invalid arguments: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run_tester(options).await {
        Ok(report) => {
            println!("{report}");
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("Tester failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Main tester execution logic
async fn run_tester(options: TesterOptions) -> Result<RunReport> {
    let config = load_config(options.config_file.as_deref())?;

    let scenario_config = ScenarioConfig {
        msin: config.ue.msin.clone(),
        gnb_id: config.gnb.gnb_id.clone(),
        ..options.scenario
    };
    let engine = Arc::new(LoopbackEngine::from_config(&config));
    let mut scenario = Scenario::new(scenario_config, config.gnb.gtp_ip_base, engine)
        .context("Invalid scenario")?;

    if scenario.config().tunnel_enabled {
        let kernel = Arc::new(CommandNetworking::from_config(&config.tunnel));
        let configurator = TunnelConfigurator::new(
            kernel,
            config.tunnel.route_prefix,
            Duration::from_millis(config.tunnel.link_timeout_ms),
        );
        info!("Tunnels enabled, routing {} through each UE", configurator.route_prefix());
        scenario = scenario.with_tunnel(configurator);
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Received Ctrl+C, no more UEs are spawned");
        stop_tx.send_replace(true);

        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C again, exiting without waiting for UEs");
            std::process::exit(1);
        }
    });

    Ok(scenario.run(stop_rx).await)
}
