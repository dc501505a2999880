use std::net;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use linewise::discovery::{self, Beacon, BeaconConfig};
use linewise::server::{self, RandomFaults, SIMULATED_FAULT_RATE};
use linewise::store::DirectoryStore;

/// Receives line-oriented files over UDP and returns their concatenation.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Data plane port.
    #[arg(long, default_value_t = linewise::DATA_PORT)]
    port: u16,

    /// Bind an IPv4 socket instead of IPv6.
    #[arg(long)]
    ipv4: bool,

    /// Directory received files are written to.
    #[arg(long, default_value = "server_files")]
    dir: PathBuf,

    #[arg(long, default_value_t = linewise::MAX_FILES)]
    file_count: u32,

    #[arg(long, default_value_t = linewise::MAX_LINES_DEFAULT)]
    max_lines: u32,

    #[arg(long, default_value_t = linewise::RETRY_LIMIT_DEFAULT)]
    retry_limit: u32,

    #[arg(long, default_value_t = linewise::ACK_TIMEOUT_DEFAULT_MS)]
    ack_timeout_ms: u64,

    /// Abandon a cycle after this long without a datagram.
    #[arg(long, default_value_t = server::Config::default().idle_timeout_ms)]
    idle_timeout_ms: u64,

    /// Randomly drop data packets or their ACKs.
    #[arg(long)]
    simulate_lost_packets: bool,

    /// Randomly treat data packets as damaged.
    #[arg(long)]
    simulate_damaged_packets: bool,

    /// Advertise this IP address with a discovery beacon.
    #[arg(long, value_name = "IP")]
    enable_service_discovery: Option<net::IpAddr>,

    /// Where discovery beacons are sent.
    #[arg(long, value_name = "ADDR", default_value_t = BeaconConfig::default().destination)]
    beacon_destination: net::SocketAddr,

    #[arg(long, default_value_t = BeaconConfig::default().interval_ms)]
    beacon_interval_ms: u64,

    /// Register the advertised address with the registry server at this address.
    #[arg(long, value_name = "ADDR")]
    register_with: Option<net::SocketAddr>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let bind_addr: net::SocketAddr = if args.ipv4 {
        (net::Ipv4Addr::UNSPECIFIED, args.port).into()
    } else {
        (net::Ipv6Addr::UNSPECIFIED, args.port).into()
    };

    let config = server::Config {
        file_count: args.file_count,
        max_lines: args.max_lines,
        retry_limit: args.retry_limit,
        ack_timeout_ms: args.ack_timeout_ms,
        idle_timeout_ms: args.idle_timeout_ms,
    };

    let store = DirectoryStore::new(&args.dir)
        .with_context(|| format!("failed to create {}", args.dir.display()))?;

    let mut server = linewise::Server::bind_with_config(bind_addr, config, store)
        .with_context(|| format!("failed to bind server at {bind_addr}"))?;

    if args.simulate_lost_packets || args.simulate_damaged_packets {
        let damage_rate = if args.simulate_damaged_packets {
            SIMULATED_FAULT_RATE
        } else {
            0.0
        };
        let loss_rate = if args.simulate_lost_packets {
            SIMULATED_FAULT_RATE
        } else {
            0.0
        };

        tracing::info!(damage_rate, loss_rate, "simulating faults");

        server = server.with_faults(RandomFaults::new(damage_rate, loss_rate));
    }

    let advertised_ip = args.enable_service_discovery.unwrap_or_else(|| {
        if args.ipv4 {
            net::Ipv4Addr::LOCALHOST.into()
        } else {
            net::Ipv6Addr::LOCALHOST.into()
        }
    });
    let advertised = net::SocketAddr::new(advertised_ip, server.local_addr().port());

    let _beacon = match args.enable_service_discovery {
        Some(_) => {
            let beacon_config = BeaconConfig {
                interval_ms: args.beacon_interval_ms,
                destination: args.beacon_destination,
            };
            Some(Beacon::start(advertised, beacon_config).context("failed to start beacon")?)
        }
        None => None,
    };

    if let Some(registry_addr) = args.register_with {
        discovery::register_service(registry_addr, advertised)
            .with_context(|| format!("failed to register with {registry_addr}"))?;
    }

    tracing::info!(dir = %args.dir.display(), "waiting for files");

    server.run().context("server stopped")
}
