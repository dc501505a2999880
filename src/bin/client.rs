use std::net;
use std::path::PathBuf;
use std::time;

use anyhow::{bail, Context, Result};
use clap::Parser;

use linewise::client::{self, SendOrder};
use linewise::discovery;
use linewise::source::LineFiles;

/// Sends line-oriented files to a server over UDP and saves their concatenation.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Server IP address, or IP:port. Not needed with service discovery or a registry.
    server: Option<String>,

    /// Find the server by listening for its discovery beacon.
    #[arg(long, conflicts_with_all = ["server", "use_registry_server"])]
    enable_service_discovery: bool,

    /// Find the server by querying a registry server.
    #[arg(long, value_name = "ADDR", conflicts_with = "server")]
    use_registry_server: Option<net::SocketAddr>,

    /// Generate every packet up front and send them in shuffled order.
    #[arg(long)]
    simulate_unordered_packets: bool,

    /// Use IPv4 instead of IPv6.
    #[arg(long)]
    ipv4: bool,

    /// Directory holding quote<N>.txt; the result is written here as concatenated.txt.
    #[arg(long, default_value = "client_files")]
    dir: PathBuf,

    #[arg(long, default_value_t = linewise::MAX_FILES)]
    file_count: u32,

    #[arg(long, default_value_t = linewise::MAX_LINES_DEFAULT)]
    max_lines: u32,

    #[arg(long, default_value_t = linewise::RETRY_LIMIT_DEFAULT)]
    retry_limit: u32,

    #[arg(long, default_value_t = linewise::ACK_TIMEOUT_DEFAULT_MS)]
    ack_timeout_ms: u64,
}

fn parse_server(server: &str) -> Result<net::SocketAddr> {
    if let Ok(addr) = server.parse::<net::SocketAddr>() {
        return Ok(addr);
    }

    let ip = server
        .parse::<net::IpAddr>()
        .with_context(|| format!("invalid server address {server:?}"))?;

    Ok(net::SocketAddr::new(ip, linewise::DATA_PORT))
}

fn resolve_server(args: &Args, config: &client::Config) -> Result<net::SocketAddr> {
    let wait = config.ack_timeout() * 5;

    if args.enable_service_discovery {
        let bind_addr: net::SocketAddr = if args.ipv4 {
            (net::Ipv4Addr::UNSPECIFIED, linewise::DISCOVERY_PORT).into()
        } else {
            (net::Ipv6Addr::UNSPECIFIED, linewise::DISCOVERY_PORT).into()
        };

        let beacon_wait = wait.max(time::Duration::from_millis(
            discovery::BeaconConfig::default().interval_ms * 2,
        ));

        return discovery::listen_for_beacon(bind_addr, beacon_wait)
            .context("service discovery failed");
    }

    if let Some(registry_addr) = args.use_registry_server {
        return discovery::query_registry(registry_addr, config.retry_limit.max(1), wait)
            .context("registry query failed");
    }

    match &args.server {
        Some(server) => parse_server(server),
        None => bail!(
            "no server given; pass SERVER_IP, --enable-service-discovery or --use-registry-server"
        ),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = client::Config {
        max_lines: args.max_lines,
        retry_limit: args.retry_limit,
        ack_timeout_ms: args.ack_timeout_ms,
        send_order: if args.simulate_unordered_packets {
            SendOrder::Shuffled
        } else {
            SendOrder::Random
        },
        ..Default::default()
    };

    let source = LineFiles::load_dir(&args.dir, "quote", args.file_count)
        .with_context(|| format!("failed to load files from {}", args.dir.display()))?;

    let server_addr = resolve_server(&args, &config)?;

    let bind_addr = discovery::ephemeral_bind_addr(&server_addr);

    let mut client = linewise::Client::bind_with_config(bind_addr, server_addr, config)
        .context("failed to create client")?;

    let result_path = args.dir.join("concatenated.txt");

    let report = client
        .transfer_to_path(&source, &result_path)
        .with_context(|| format!("transfer to {server_addr} failed"))?;

    tracing::info!(
        packets = report.packets,
        transmissions = report.transmissions,
        result_lines = report.result_lines,
        result = %result_path.display(),
        "transfer complete"
    );

    Ok(())
}
