//! liqcap-capturer: capture raw liquidation messages from exchange WebSockets
//!
//! Streams every selected venue concurrently and writes one JSON line per
//! event to stdout. Runs until SIGINT/SIGTERM or until every stream ends.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use futures_util::StreamExt;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::io::AsyncWriteExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use liqcap_connector_lib::{venues, LiquidationStreamClient, StreamMetrics, TungsteniteTransport};
use liqcap_metadata::{CapturerOptions, Venue};

const OUTPUT_BUFFER: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum VenueSelection {
    Binance,
    Hyperliquid,
    All,
}

impl VenueSelection {
    fn venues(self) -> Vec<Venue> {
        match self {
            VenueSelection::Binance => vec![Venue::Binance],
            VenueSelection::Hyperliquid => vec![Venue::Hyperliquid],
            VenueSelection::All => Venue::ALL.to_vec(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "liqcap-capturer")]
#[command(about = "Capture liquidation events from exchange WebSocket feeds")]
struct Args {
    /// Path to capturer configuration file (defaults apply when omitted)
    #[arg(short, long, env = "LIQCAP_CONFIG")]
    config: Option<PathBuf>,

    /// Venue(s) to capture
    #[arg(long, value_enum, default_value = "all")]
    venue: VenueSelection,

    /// Write Prometheus metrics to stderr on exit
    #[arg(long)]
    dump_metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let options = match &args.config {
        Some(path) => CapturerOptions::load(path).map_err(|e| {
            error!(error = %e, path = ?path, "Failed to load config");
            e
        })?,
        None => {
            let options = CapturerOptions::default();
            options.validate()?;
            options
        }
    };

    let registry = Registry::new();
    let metrics = StreamMetrics::new(&registry)?;

    // Build every client before opening any socket so bad config fails fast.
    let clients = args
        .venue
        .venues()
        .into_iter()
        .map(|venue| {
            venues::build_client(venue, &options, TungsteniteTransport, &metrics).map(Arc::new)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let shutdown = CancellationToken::new();
    let (tx, rx) = mpsc::channel::<String>(OUTPUT_BUFFER);
    let printer = tokio::spawn(print_lines(rx));

    let mut tasks = JoinSet::new();
    for client in &clients {
        info!(exchange = %client.exchange_id(), endpoint = %client.config().endpoint(), "Spawning capture task");
        tasks.spawn(capture(Arc::clone(client), tx.clone(), shutdown.child_token()));
    }
    drop(tx);

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(venues = clients.len(), "Capturer running, waiting for SIGTERM/SIGINT to stop");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down gracefully");
                break;
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down gracefully");
                break;
            }
            result = tasks.join_next() => match result {
                Some(Ok(())) => continue,
                Some(Err(e)) => {
                    error!(error = %e, "Capture task panicked");
                    continue;
                }
                None => {
                    info!("All streams ended");
                    break;
                }
            },
        }
    }

    shutdown.cancel();
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Capture task panicked during shutdown");
        }
    }

    for client in &clients {
        client.dispose().await;
    }

    if let Err(e) = printer.await {
        error!(error = %e, "Output task panicked");
    }

    if args.dump_metrics {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        eprint!("{}", String::from_utf8_lossy(&buffer));
    }

    info!("Capturer shutdown complete");
    Ok(())
}

/// Stream one venue until its stream ends or `shutdown` fires.
async fn capture(
    client: Arc<LiquidationStreamClient>,
    tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
) {
    let exchange = client.exchange_id().to_string();
    let mut stream = match client.stream_events(shutdown) {
        Ok(stream) => stream,
        Err(e) => {
            error!(exchange = %exchange, error = %e, "Failed to start stream");
            return;
        }
    };

    let mut captured: u64 = 0;
    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                error!(exchange = %exchange, error = %e, "Stream terminated");
                break;
            }
        };

        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!(exchange = %exchange, error = %e, "Failed to serialize event");
                continue;
            }
        };
        if tx.send(line).await.is_err() {
            warn!(exchange = %exchange, "Output closed, stopping capture");
            break;
        }
        captured += 1;
    }

    info!(exchange = %exchange, captured, "Capture finished");
}

/// Single writer for stdout so lines from different venues never interleave.
async fn print_lines(mut rx: mpsc::Receiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            error!(error = %e, "Failed to write to stdout");
            return;
        }
    }
    if let Err(e) = stdout.flush().await {
        error!(error = %e, "Failed to flush stdout");
    }
}
