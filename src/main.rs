//! Demonstration binary for `peertalk`.
//!
//! Connects two sessions over an in-process pipe or loopback TCP, waits for
//! capability negotiation, and sends messages from peer A to peer B.

mod cli;

use std::{
    error::Error,
    time::{Duration, Instant},
};

use clap::Parser;
use cli::{Cli, TransportKind};
use peertalk::{
    MessageHandler,
    PeerId,
    Priority,
    Session,
    SessionConfig,
    transport::{MemoryTransport, TcpTransport, Transport},
};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

type BoxError = Box<dyn Error + Send + Sync>;

const DEADLINE: Duration = Duration::from_secs(10);

/// Counts deliveries at peer B and checks them against the sent pattern.
#[derive(Debug)]
struct Receiver {
    expected: Vec<u8>,
    matched: u32,
    mismatched: u32,
}

impl MessageHandler for Receiver {
    fn on_message(&mut self, peer: PeerId, payload: &[u8]) {
        if payload == self.expected {
            self.matched += 1;
        } else {
            self.mismatched += 1;
            warn!(%peer, len = payload.len(), "received message does not match");
        }
    }
}

fn ignore(_: PeerId, _: &[u8]) {}

fn pattern(len: u16) -> Vec<u8> {
    (0..usize::from(len))
        .map(|i| u8::try_from(i % 251).unwrap_or_default())
        .collect()
}

/// Drives both sessions until every message has arrived.
struct Demo<T> {
    a: Session<T>,
    b: Session<T>,
    receiver: Receiver,
    to_send: u32,
    count: u32,
}

impl<T: Transport> Demo<T> {
    fn negotiated(&self) -> bool {
        self.a.negotiator().peer().exchanged() && self.b.negotiator().peer().exchanged()
    }

    fn done(&self) -> bool { self.receiver.matched + self.receiver.mismatched >= self.count }

    /// One round of sends and polls. Returns whether anything moved.
    fn step(&mut self) -> Result<bool, BoxError> {
        let mut queued = false;
        while self.negotiated() && self.to_send > 0 {
            match self.a.send(&self.receiver.expected, Priority::Normal) {
                Ok(()) => {
                    self.to_send -= 1;
                    queued = true;
                }
                Err(err) if err.is_would_block() => break,
                Err(err) => return Err(err.into()),
            }
        }
        let a = self.a.poll(&mut ignore)?;
        let b = self.b.poll(&mut self.receiver)?;
        Ok(queued || a.frames_sent + a.delivered + b.frames_sent + b.delivered > 0)
    }

    fn report(&self) {
        let negotiator = self.a.negotiator();
        info!(
            effective_max = negotiator.effective_max_message_size(),
            effective_chunk = negotiator.effective_chunk(),
            peer_pressure = negotiator.peer().buffer_pressure(),
            "peer A view of the link"
        );
        info!(
            matched = self.receiver.matched,
            mismatched = self.receiver.mismatched,
            "peer B deliveries"
        );
    }
}

fn configs(cli: &Cli) -> Result<(SessionConfig, SessionConfig), BoxError> {
    let a = SessionConfig::builder()
        .max_message_size(cli.peer_a_max)
        .build()?;
    let b = SessionConfig::builder()
        .max_message_size(cli.peer_b_max)
        .build()?;
    Ok((a, b))
}

fn demo<T: Transport>(cli: &Cli, left: T, right: T) -> Result<Demo<T>, BoxError> {
    let (config_a, config_b) = configs(cli)?;
    Ok(Demo {
        a: Session::new(PeerId::new(1), left, &config_a)?,
        b: Session::new(PeerId::new(2), right, &config_b)?,
        receiver: Receiver {
            expected: pattern(cli.message_size),
            matched: 0,
            mismatched: 0,
        },
        to_send: cli.count,
        count: cli.count,
    })
}

fn run_memory(cli: &Cli) -> Result<Demo<MemoryTransport>, BoxError> {
    let (left, right) = MemoryTransport::pair();
    let mut demo = demo(cli, left, right)?;
    let started = Instant::now();
    while !demo.done() {
        if !demo.step()? && started.elapsed() > DEADLINE {
            return Err("demo stalled".into());
        }
    }
    Ok(demo)
}

async fn run_tcp(cli: &Cli) -> Result<Demo<TcpTransport>, BoxError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (connected, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let (accepted, _) = accepted?;
    info!(%addr, "loopback link established");

    let mut demo = demo(cli, TcpTransport::new(connected?), TcpTransport::new(accepted))?;
    let deadline = tokio::time::Instant::now() + DEADLINE;
    while !demo.done() {
        if demo.step()? {
            continue;
        }
        let ready = async {
            tokio::select! {
                res = demo.a.transport().ready() => res,
                res = demo.b.transport().ready() => res,
            }
        };
        match tokio::time::timeout_at(deadline, ready).await {
            Ok(res) => res?,
            Err(_) => return Err("demo stalled".into()),
        }
    }
    Ok(demo)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Enable structured logging for the demo.
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    #[cfg(feature = "metrics")]
    let exporter = if cli.print_metrics {
        Some(metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    match cli.transport {
        TransportKind::Memory => run_memory(&cli)?.report(),
        TransportKind::Tcp => run_tcp(&cli).await?.report(),
    }

    #[cfg(feature = "metrics")]
    if let Some(handle) = exporter {
        handle.run_upkeep();
        println!("{}", handle.render());
    }
    #[cfg(not(feature = "metrics"))]
    if cli.print_metrics {
        warn!("built without the metrics feature; nothing to print");
    }
    Ok(())
}
