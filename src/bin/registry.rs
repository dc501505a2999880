use std::net;

use anyhow::{Context, Result};
use clap::Parser;

use linewise::discovery::RegistryServer;

/// Stores a service address for clients to look up.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value_t = linewise::REGISTRY_PORT)]
    port: u16,

    /// Bind an IPv4 socket instead of IPv6.
    #[arg(long)]
    ipv4: bool,
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

    let mut registry = RegistryServer::bind(bind_addr)
        .with_context(|| format!("failed to bind registry at {bind_addr}"))?;

    registry.run().context("registry stopped")
}
