use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

/// Command line arguments for a single ring node.
///
/// Every timing or ring parameter left unset falls back to the INI config
/// file (if given) and then to the built-in defaults.
#[derive(Parser, Debug)]
#[command(name = "chord-ring", about = "Run a Chord DHT node over UDP")]
pub struct Cli {
    /// Optional INI configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind the datagram endpoint on
    #[arg(short, long)]
    pub address: Option<IpAddr>,

    /// Port to bind the datagram endpoint on (0 picks an ephemeral port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Seed peer to join; without it the node starts a new ring
    #[arg(long)]
    pub peer: Option<SocketAddr>,

    /// Width of the identifier circle in bits
    #[arg(long)]
    pub ring_bits: Option<u32>,

    /// Length of the successor list (replication anchors)
    #[arg(long)]
    pub successors: Option<usize>,

    /// Log at debug level
    #[arg(short, long)]
    pub debug: bool,
}
