//! The ISIS-ordered replicated transaction log node process.
//!
//! Owns every collaborator §1 and §6 name as out of the core's scope:
//! membership parsing and group bootstrap ([`bootstrap`]), the stdin
//! command parser and balance state machine (`isis_ledger`), and metrics.
//! `isis_core::Core` is the only piece that actually runs the ISIS
//! protocol; this binary just wires it to the outside world, the way
//! `crates/rqbit`'s `main.rs` wires `librqbit::Session` to a CLI and an
//! HTTP API.

mod bootstrap;

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use isis_core::Core;
use isis_ledger::{now_secs, parse_line, Ledger, MetricsWriter};
use isis_membership::Membership;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// A node in a replicated, totally-ordered multicast transaction log.
/// Applies DEPOSIT and TRANSFER commands read from stdin to a local
/// balance map, in the same order at every live peer.
#[derive(Parser)]
#[command(version, author, about)]
struct Opts {
    /// This node's name; must appear in the membership file.
    #[arg(env = "ISISD_NAME")]
    name: String,

    /// Path to the membership file: line 1 is the peer count, followed by
    /// one `<name> <address> <port>` line per peer, position defining
    /// that peer's index.
    #[arg(env = "ISISD_MEMBERSHIP")]
    membership: PathBuf,

    /// The console log level.
    #[arg(
        long = "log-level",
        value_enum,
        default_value = "info",
        env = "ISISD_LOG_LEVEL_CONSOLE"
    )]
    log_level: LogLevel,

    /// Log filename to additionally write full debug-level logs to.
    #[arg(long = "log-file", env = "ISISD_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Where to write the per-message delivery metrics CSV
    /// (`id,start_time,delivery_time,node,priority`).
    #[arg(
        long = "metrics-file",
        default_value = "system_metrics.csv",
        env = "ISISD_METRICS_FILE"
    )]
    metrics_file: PathBuf,

    /// Where to write the running balance log: one `BALANCES ...` line
    /// per applied deposit or successful transfer.
    #[arg(
        long = "balances-file",
        default_value = "balances.txt",
        env = "ISISD_BALANCES_FILE"
    )]
    balances_file: PathBuf,

    /// Maximum connect attempts per peer during bootstrap before giving up
    /// on that peer and failing loudly, instead of retrying forever
    /// (resolves §9's open question on retrying `connect`).
    #[arg(
        long = "connect-retries",
        default_value_t = 10,
        env = "ISISD_CONNECT_RETRIES"
    )]
    connect_retries: usize,
}

fn init_logging(opts: &Opts) -> Result<()> {
    let console_filter = EnvFilter::builder()
        .with_default_directive(opts.log_level.as_directive().parse()?)
        .from_env()
        .context("invalid RUST_LOG value")?;
    let registry = tracing_subscriber::registry().with(fmt::layer().with_filter(console_filter));

    match &opts.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path:?}"))?;
            registry
                .with(
                    fmt::layer()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_filter(EnvFilter::new("debug")),
                )
                .try_init()
                .context("initializing tracing subscriber")?;
        }
        None => registry
            .try_init()
            .context("initializing tracing subscriber")?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();
    init_logging(&opts)?;

    let membership = Membership::load(&opts.membership)
        .with_context(|| format!("loading membership file {:?}", opts.membership))?;
    let self_index = membership
        .self_index(&opts.name)
        .context("resolving this node's index")?;
    let self_peer = membership
        .peer(self_index)
        .expect("self_index always resolves to a peer")
        .clone();

    let (deliver_tx, deliver_rx) = unbounded_channel();
    let core = Arc::new(Core::new(self_index, membership.peer_count(), deliver_tx));

    bootstrap::connect_group(
        core.clone(),
        &membership,
        self_index,
        self_peer.port,
        opts.connect_retries,
    )
    .await
    .context("connecting to peer group")?;

    let metrics = MetricsWriter::create(&opts.metrics_file)
        .with_context(|| format!("opening metrics file {:?}", opts.metrics_file))?;
    tokio::spawn(run_ledger(
        deliver_rx,
        self_index,
        metrics,
        opts.balances_file.clone(),
    ));

    info!(self_index, name = %opts.name, "node ready, reading commands from stdin");
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut sequence: u64 = 0;
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line, &opts.name, self_index, &mut sequence, now_secs()) {
            Ok(msg) => core.submit(msg),
            Err(e) => warn!(%line, error = %e, "rejecting malformed input line"),
        }
    }

    // Stdin closing ends this node the way the original's `main` returning
    // does: the peer connection tasks and the ledger task never reach a
    // natural end on their own (there is no rejoin or shutdown protocol,
    // §1's Non-goals), so process exit is what actually stops them.
    info!("stdin closed, shutting down");
    Ok(())
}

/// Applies every delivered message to the balance state machine, in the
/// agreed total order, and mirrors `rDeliver`'s two side effects: a
/// metrics CSV line for every delivery, and a `BALANCES` line — to both
/// stdout and `balances_file` — whenever the delivery actually changed a
/// balance.
async fn run_ledger(
    mut deliver_rx: tokio::sync::mpsc::UnboundedReceiver<isis_wire::Message>,
    self_index: isis_wire::NodeIndex,
    mut metrics: MetricsWriter,
    balances_path: PathBuf,
) -> Result<()> {
    let mut ledger = Ledger::new();
    let mut out = std::fs::File::create(&balances_path)
        .with_context(|| format!("opening balances file {balances_path:?}"))?;

    while let Some(msg) = deliver_rx.recv().await {
        let delivered_at = now_secs();
        if let Err(e) = metrics.record(&msg, self_index, delivered_at) {
            warn!(error = %e, "failed to record delivery metrics");
        }
        if ledger.apply(&msg.payload) {
            let line = ledger.format_balances();
            println!("{line}");
            writeln!(out, "{line}").context("writing balances file")?;
        }
    }
    metrics.flush().context("flushing metrics file")?;
    Ok(())
}
