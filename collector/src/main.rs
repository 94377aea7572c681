use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ingest::Store;
use ingest_client::{BufferedStream, Client, StreamSummary};
use obs_sqlite::Db;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wire::{EntradaEntry, LogEntry, PassiveEntry, StreamEntry, ZoneEntry};

mod config;
mod input;
mod logging;

#[derive(Debug, Parser)]
#[command(name = "collector", version, about = "Domain observation collector")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./collector.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Server address for client commands (default: server.listen from config)
    #[arg(long, global = true)]
    server: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Run the ingest server until interrupted
    Serve {
        /// Listen address (overrides server.listen)
        #[arg(long)]
        listen: Option<String>,
        /// SQLite database path (overrides db.path)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Start or stop a measurement
    Measurement {
        #[command(subcommand)]
        cmd: MeasurementCmd,
    },
    /// Start or stop a stage of a running measurement
    Stage {
        #[command(subcommand)]
        cmd: StageCmd,
    },
    /// Stream observations from a file to the server
    Push {
        #[command(subcommand)]
        cmd: PushCmd,
    },
}

#[derive(Debug, Subcommand)]
enum MeasurementCmd {
    /// Start a measurement and print its muid
    Start {
        #[arg(long, default_value = "")]
        description: String,
        /// Defaults to $HOSTNAME
        #[arg(long)]
        host: Option<String>,
    },
    Stop { muid: String },
}

#[derive(Debug, Subcommand)]
enum StageCmd {
    Start { muid: String },
    Stop { muid: String },
}

#[derive(Debug, Args)]
struct PushArgs {
    /// Measurement the observations belong to
    #[arg(long)]
    muid: String,
    /// Entries per batch frame (overrides client.batch_size)
    #[arg(long)]
    batch_size: Option<usize>,
    /// Maximum unacknowledged entries (overrides client.window)
    #[arg(long)]
    window: Option<usize>,
    file: PathBuf,
}

#[derive(Debug, Subcommand)]
enum PushCmd {
    /// CSV with columns query,query_type,timestamp_ms
    Passive(PushArgs),
    /// CSV with columns fqdn,timestamp_ms[,last_seen_ms]
    Entrada(PushArgs),
    /// CSV with columns apex,type,timestamp_ms (type: REGISTRATION, EXPIRATION, FIRST_SEEN)
    Zone(PushArgs),
    /// JSON lines of CT log entries with base64 DER certificates
    Ct(PushArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    logging::init(&cfg.log_level);
    let server = cli.server.clone().unwrap_or_else(|| cfg.server.listen.clone());

    match cli.command {
        Commands::Version => {
            println!("collector {} (core {})", env!("CARGO_PKG_VERSION"), collector_core::version());
        }
        Commands::Serve { listen, db } => {
            let listen = listen.unwrap_or_else(|| cfg.server.listen.clone());
            let path = db.unwrap_or_else(|| cfg.db.path.clone());
            let db = Db::open_or_create(&path).with_context(|| format!("open database {}", path.display()))?;
            let store = Arc::new(Store::open(db, cfg.store(), cfg.anonymizer())?);
            info!(db = %path.display(), "database ready");
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async move {
                let listener = TcpListener::bind(&listen).await.with_context(|| format!("bind {listen}"))?;
                let shutdown = interrupt_token();
                ingest_server::serve(listener, store.clone(), shutdown).await?;
                // stop whatever the clients left open so staged rows reach disk
                let ctx = CancellationToken::new();
                for muid in store.active_measurements()? {
                    if let Err(e) = store.stop_measurement(&ctx, &muid) {
                        warn!(%muid, error = %e, "could not stop measurement on shutdown");
                    }
                }
                Ok::<_, anyhow::Error>(())
            })?;
        }
        Commands::Measurement { cmd } => {
            let client = Client::new(server);
            let rt = tokio::runtime::Runtime::new()?;
            match cmd {
                MeasurementCmd::Start { description, host } => {
                    let host = host.or_else(|| std::env::var("HOSTNAME").ok()).unwrap_or_default();
                    let muid = rt.block_on(client.start_measurement(&description, &host))?;
                    println!("{muid}");
                }
                MeasurementCmd::Stop { muid } => rt.block_on(client.stop_measurement(&muid))?,
            }
        }
        Commands::Stage { cmd } => {
            let client = Client::new(server);
            let rt = tokio::runtime::Runtime::new()?;
            match cmd {
                StageCmd::Start { muid } => rt.block_on(client.start_stage(&muid))?,
                StageCmd::Stop { muid } => rt.block_on(client.stop_stage(&muid))?,
            }
        }
        Commands::Push { cmd } => {
            let client = Client::new(server);
            let rt = tokio::runtime::Runtime::new()?;
            let started = Instant::now();
            let summary = rt.block_on(async {
                match cmd {
                    PushCmd::Passive(a) => {
                        let (b, w) = sizes(&a, &cfg);
                        let stream = client.passive_entries(&a.muid, b, w).await?;
                        push::<PassiveEntry>(stream, input::csv_entries(&a.file)?).await
                    }
                    PushCmd::Entrada(a) => {
                        let (b, w) = sizes(&a, &cfg);
                        let stream = client.entrada_entries(&a.muid, b, w).await?;
                        push::<EntradaEntry>(stream, input::csv_entries(&a.file)?).await
                    }
                    PushCmd::Zone(a) => {
                        let (b, w) = sizes(&a, &cfg);
                        let stream = client.zone_entries(&a.muid, b, w).await?;
                        push::<ZoneEntry>(stream, input::csv_entries(&a.file)?).await
                    }
                    PushCmd::Ct(a) => {
                        let (b, w) = sizes(&a, &cfg);
                        let stream = client.log_entries(&a.muid, b, w).await?;
                        push::<LogEntry>(stream, input::jsonl_entries(&a.file)?).await
                    }
                }
            })?;
            println!(
                "acked {} failed {} in {:.2}s",
                summary.acked,
                summary.failed,
                started.elapsed().as_secs_f64()
            );
        }
    }
    Ok(())
}

fn sizes(a: &PushArgs, cfg: &config::Config) -> (usize, usize) {
    (a.batch_size.unwrap_or(cfg.client.batch_size), a.window.unwrap_or(cfg.client.window))
}

/// Cancelled on Ctrl-C. Must be called inside the runtime.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupted");
                t.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for ctrl-c"),
        }
    });
    token
}

async fn push<E: StreamEntry>(
    stream: BufferedStream<E>,
    entries: impl Iterator<Item = Result<E>>,
) -> Result<StreamSummary> {
    let ctx = interrupt_token();
    let mut sent = 0usize;
    for entry in entries {
        if ctx.is_cancelled() {
            break;
        }
        match entry {
            Ok(e) => {
                stream.send(e).await?;
                sent += 1;
            }
            Err(e) => warn!(error = %format!("{e:#}"), "skipping unreadable input"),
        }
    }
    let summary = stream.close_send(&ctx).await?;
    info!(sent, acked = summary.acked, failed = summary.failed, "push finished");
    Ok(summary)
}
