//! dhcprobe - broadcast one DHCPDISCOVER and report who answers
//!
//! Exit status: 0 when an offer arrives, 2 when nothing answers before the
//! timeout, 1 on any error and 130 when interrupted.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use dhcprobe_core::TransactionId;
use dhcprobe_discovery::{find_interface, probe_with_options, Offer, PnetLink, ProbeOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const EXIT_NO_REPLY: u8 = 2;
const EXIT_ERROR: u8 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "dhcprobe")]
#[command(about = "Broadcast a DHCPDISCOVER and report the first matching offer")]
#[command(version)]
pub struct Args {
    /// Interface to probe on
    interface: Option<String>,

    /// Seconds to wait for a reply
    timeout: Option<u64>,

    /// Path to configuration file
    #[arg(short, long, default_value = "dhcprobe.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Fixed transaction id in hex instead of a random one
    #[arg(long)]
    xid: Option<TransactionId>,

    /// Ask servers to broadcast their reply
    #[arg(long)]
    broadcast: bool,

    /// Print the offer as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    // Read before logging is up so the file can set the level
    let loaded = config::load_config(&args.config)?;
    let from_file = loaded.is_some();
    let mut config = loaded.unwrap_or_default();
    config.apply_args(&args);

    init_logging(&config.logging.level)?;
    info!("dhcprobe v{}", env!("CARGO_PKG_VERSION"));
    if from_file {
        info!(path = %args.config.display(), "Loaded configuration");
    } else {
        info!(
            path = %args.config.display(),
            "Configuration file not found, using defaults"
        );
    }
    config.validate()?;

    let name = config
        .probe
        .interface
        .clone()
        .context("no interface given on the command line or in the configuration")?;
    let (interface, mac) = find_interface(&name)?;
    let link = PnetLink::open(&interface, config.probe.poll_interval())
        .with_context(|| format!("opening raw link on {} (needs CAP_NET_RAW)", name))?;

    let xid = args.xid.unwrap_or_else(TransactionId::random);
    let options = config.probe.to_probe_options();

    info!(
        interface = %name,
        mac = %mac,
        xid = %xid,
        timeout_secs = config.probe.timeout_secs,
        "Starting probe"
    );

    let task = tokio::task::spawn_blocking(move || probe_with_options(link, mac, xid, &options));

    let outcome = tokio::select! {
        joined = task => joined.context("probe task failed")??,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            // the blocking read holds the runtime open until its deadline
            std::process::exit(EXIT_INTERRUPTED);
        }
    };

    match outcome {
        ProbeOutcome::Offered(offer) => {
            info!(client = %offer.client, server = %offer.server, "Offer received");
            if args.json {
                println!("{}", serde_json::to_string_pretty(&offer)?);
            } else {
                print_offer(&offer);
            }
            Ok(ExitCode::SUCCESS)
        }
        ProbeOutcome::NoReply => {
            if args.json {
                println!("null");
            } else {
                println!("no reply within {}s", config.probe.timeout_secs);
            }
            Ok(ExitCode::from(EXIT_NO_REPLY))
        }
    }
}

/// RUST_LOG wins over the configured level
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level {:?}", level))?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn print_offer(offer: &Offer) {
    println!("received offer client: {}, server: {}", offer.client, offer.server);

    if let Some(kind) = offer.message_type {
        println!("  message type:      {}", kind);
    }
    if let Some(id) = offer.server_identifier {
        println!("  server identifier: {}", id);
    }
    if let Some(mask) = offer.subnet_mask {
        println!("  subnet mask:       {}", mask);
    }
    if let Some(lease) = offer.lease_time {
        println!("  lease time:        {}s", lease);
    }
    if !offer.routers.is_empty() {
        println!("  routers:           {}", join(&offer.routers));
    }
    if !offer.dns_servers.is_empty() {
        println!("  dns servers:       {}", join(&offer.dns_servers));
    }
}

fn join(addrs: &[std::net::Ipv4Addr]) -> String {
    addrs
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
