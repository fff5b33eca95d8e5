//! Entry point for `netstack`.
//!
//! Builds one [`Stack`] from command-line flags, attaches a UDP-backed link
//! per `--link`, and runs an echo service on `--port` until ctrl-c.  Without
//! `--port` the process only routes.  All protocol work lives in the library;
//! `main.rs` owns process setup (logging, argument parsing, the runtime).

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use clap::Parser;

use netstack::route::{Cidr, RoutingEntry};
use netstack::socket::Driver;
use netstack::{RoutingTable, Stack, StackConfig};

/// Link framing, an IPv4 router/host and a TCP-subset echo server over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// UDP address carrying every link (e.g. 127.0.0.1:5000).
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    bind: SocketAddr,

    /// This host's IPv4 address.
    #[arg(short, long)]
    address: Option<Ipv4Addr>,

    /// Neighbor reachable over UDP, as NEIGHBOR_IP=HOST:PORT.  Repeatable.
    #[arg(short, long = "link", value_parser = parse_link)]
    links: Vec<LinkArg>,

    /// Routing entry, as CIDR=NEXT_HOP.  Repeatable; earlier entries win ties.
    #[arg(short, long = "route", value_parser = parse_route)]
    routes: Vec<RoutingEntry>,

    /// Accept connections on this TCP port and echo what they send.
    #[arg(short, long)]
    port: Option<u16>,

    /// Largest payload per outbound segment.
    #[arg(long, default_value_t = StackConfig::default().mss)]
    mss: usize,

    /// Accept datagrams and segments with bad checksums.
    #[arg(long)]
    ignore_checksum: bool,
}

#[derive(Debug, Clone, Copy)]
struct LinkArg {
    neighbor: Ipv4Addr,
    peer: SocketAddr,
}

fn parse_link(s: &str) -> Result<LinkArg, String> {
    let (neighbor, peer) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NEIGHBOR_IP=HOST:PORT, got `{s}`"))?;
    Ok(LinkArg {
        neighbor: neighbor.trim().parse().map_err(|e| format!("{neighbor}: {e}"))?,
        peer: peer.trim().parse().map_err(|e| format!("{peer}: {e}"))?,
    })
}

fn parse_route(s: &str) -> Result<RoutingEntry, String> {
    let (prefix, next_hop) = s
        .split_once('=')
        .ok_or_else(|| format!("expected CIDR=NEXT_HOP, got `{s}`"))?;
    Ok(RoutingEntry {
        prefix: prefix.trim().parse::<Cidr>().map_err(|e| e.to_string())?,
        next_hop: next_hop.trim().parse().map_err(|e| format!("{next_hop}: {e}"))?,
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let mut stack = Stack::new(StackConfig {
        mss: cli.mss,
        ignore_checksum: cli.ignore_checksum,
        ..StackConfig::default()
    });
    if let Some(address) = cli.address {
        stack.set_local_address(address);
    }
    stack.set_routing_table(cli.routes.into_iter().collect::<RoutingTable>());

    let mut driver = Driver::bind(cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    for link in &cli.links {
        driver.connect_link(&mut stack, link.neighbor, link.peer);
    }

    if let Some(port) = cli.port {
        stack.listen(port).on_accept(|conn| {
            log::info!("[echo] {} connected", conn.id());
            conn.on_receive(|conn, data| {
                let result = if conn.peer_finished() {
                    conn.close()
                } else if data.is_empty() {
                    Ok(())
                } else {
                    conn.send(data).map(drop)
                };
                if let Err(e) = result {
                    log::warn!("[echo] {}: {e}", conn.id());
                }
            });
        });
    }

    log::info!("netstack running on {}", driver.local_addr()?);
    driver.run(&mut stack).await.context("event loop failed")?;
    Ok(())
}
