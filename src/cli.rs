//! Command line interface for the `peertalk` demonstration binary.
//!
//! The binary connects two sessions, lets them negotiate capabilities, and
//! sends messages from one to the other so the routing, batching and
//! fragmentation paths can be observed in the logs.

use clap::{Parser, ValueEnum};

/// Link carrying frames between the two demo peers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// In-process byte pipe.
    #[default]
    Memory,
    /// TCP over the loopback interface.
    Tcp,
}

/// Command line arguments for the `peertalk` binary.
#[derive(Debug, Parser)]
#[command(
    name = "peertalk",
    version,
    about = "Send messages between two peertalk sessions"
)]
pub struct Cli {
    /// Bytes per message sent from peer A to peer B.
    #[arg(short = 's', long, default_value_t = 2000)]
    pub message_size: u16,

    /// Number of messages to send.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: u32,

    /// Largest unfragmented message peer A accepts.
    #[arg(long, default_value_t = 8192)]
    pub peer_a_max: u16,

    /// Largest unfragmented message peer B accepts.
    #[arg(long, default_value_t = 512)]
    pub peer_b_max: u16,

    /// Link between the peers.
    #[arg(short, long, value_enum, default_value_t = TransportKind::Memory)]
    pub transport: TransportKind,

    /// Print the collected metrics in Prometheus text format on exit.
    #[arg(long)]
    pub print_metrics: bool,
}
