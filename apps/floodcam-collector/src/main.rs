use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod config;
mod replay;
mod sqlite_store;

use floodcam_node::persistence::DirectoryObjectStore;
use floodcam_node::runtime::subscribe_all;
use floodcam_node::{CollectorService, ObjectStore, PersistenceError, RuntimeStats};
use floodcam_transport::adapter::{TransportAdapter, TransportMessage};

use crate::config::{CollectorConfig, StoreKind};
use crate::replay::{load_capture_file, parse_capture_line};
use crate::sqlite_store::SqliteObjectStore;

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (.toml, .yaml, .json or .env)
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read JSON-lines capture records from stdin until EOF or a signal (default)
    Run,
    /// Feed a capture file through the collector and exit
    Replay {
        /// JSON-lines file of `{"topic", "payload_b64"}` records
        file: PathBuf,
    },
    /// List recently stored images
    List {
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },
    /// Print the subscription patterns the collector needs
    Patterns,
}

type SharedStore = Arc<dyn ObjectStore + Send + Sync>;

fn open_store(config: &CollectorConfig) -> Result<SharedStore, PersistenceError> {
    match config.store {
        StoreKind::Sqlite => {
            let store = SqliteObjectStore::open(&config.database_path)?;
            info!("storing images in {}", config.database_path.display());
            Ok(Arc::new(store))
        }
        StoreKind::Directory => {
            let store = DirectoryObjectStore::open(config.image_dir.clone())?;
            info!("storing images under {}", config.image_dir.display());
            Ok(Arc::new(store))
        }
    }
}

fn log_stats(stats: &RuntimeStats) {
    info!(
        messages = stats.messages,
        chunks = stats.chunks,
        envelopes = stats.envelopes,
        decode_errors = stats.decode_errors,
        duplicates = stats.duplicates,
        orphans = stats.orphans,
        gaps = stats.gaps,
        completed = stats.completed(),
        truncated = stats.completed_truncated,
        evictions = stats.evictions,
        queue_drops = stats.queue_drops,
        persisted = stats.persisted,
        persistence_failures = stats.persistence_failures,
        pairs = stats.pairs_completed,
        "collector stopped"
    );
}

fn list_images(config: &CollectorConfig, limit: usize) -> Result<(), PersistenceError> {
    match config.store {
        StoreKind::Sqlite => {
            let store = SqliteObjectStore::open(&config.database_path)?;
            for image in store.recent(limit)? {
                println!(
                    "{}\t{}\t{}\t{}B\t{}\t{}",
                    image.id,
                    image.session_id,
                    image.variant,
                    image.actual_size,
                    image.source,
                    image.device_id.as_deref().unwrap_or("-")
                );
            }
        }
        StoreKind::Directory => {
            for name in list_directory(&config.image_dir, limit)? {
                println!("{name}");
            }
        }
    }
    Ok(())
}

fn list_directory(dir: &Path, limit: usize) -> Result<Vec<String>, PersistenceError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(PersistenceError::Read)? {
        let entry = entry.map_err(PersistenceError::Read)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".jpg") {
            names.push(name);
        }
    }
    names.sort();
    names.truncate(limit);
    Ok(names)
}

async fn replay(config: &CollectorConfig, store: SharedStore, file: &Path) -> RuntimeStats {
    let reassembly = config.reassembly();
    let mut adapter = match load_capture_file(file) {
        Ok(adapter) => adapter,
        Err(err) => {
            error!("failed to load {}: {err}", file.display());
            std::process::exit(1);
        }
    };
    if let Err(err) = subscribe_all(&mut adapter, &reassembly.decoder) {
        error!("invalid subscription pattern: {err}");
        std::process::exit(1);
    }
    info!("replaying {} records from {}", adapter.pending(), file.display());

    let service = CollectorService::start(reassembly, store);
    while let Some(message) = adapter.recv() {
        if let Err(err) = service.handle(message).await {
            warn!("replay stopped early: {err}");
            break;
        }
    }
    let health = adapter.health_snapshot();
    if health.inbound_dropped > 0 {
        warn!(
            dropped = health.inbound_dropped,
            "records on topics outside the subscription were skipped"
        );
    }
    service.shutdown().await
}

/// Reads capture lines from stdin on a plain thread; the channel closes at EOF.
fn spawn_stdin_reader(capacity: usize) -> mpsc::Receiver<TransportMessage> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for (idx, line) in stdin.lock().lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    error!("stdin read failed: {err}");
                    break;
                }
            };
            match parse_capture_line(idx + 1, &line) {
                Ok(Some(message)) => {
                    if tx.blocking_send(message).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => warn!("skipping capture record: {err}"),
            }
        }
    });
    rx
}

async fn run(config: &CollectorConfig, store: SharedStore) -> RuntimeStats {
    let shutdown = Arc::new(AtomicBool::new(false));
    let _ = flag::register(SIGTERM, Arc::clone(&shutdown));
    let _ = flag::register(SIGINT, Arc::clone(&shutdown));

    let reassembly = config.reassembly();
    let mut inbound = spawn_stdin_reader(reassembly.ingest_queue_capacity);
    let service = CollectorService::start(reassembly, store);
    info!("reading capture records from stdin");

    while !shutdown.load(Ordering::Relaxed) {
        match tokio::time::timeout(SHUTDOWN_POLL, inbound.recv()).await {
            Ok(Some(message)) => {
                if let Err(err) = service.handle(message).await {
                    error!("collector stopped accepting messages: {err}");
                    break;
                }
            }
            Ok(None) => {
                info!("stdin closed");
                break;
            }
            Err(_) => {}
        }
    }
    if shutdown.load(Ordering::Relaxed) {
        info!("shutdown signal received");
    }
    service.shutdown().await
}

#[tokio::main]
async fn main() {
    let filter = std::env::var("FLOODCAM_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let config = match CollectorConfig::new(cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err}");
            std::process::exit(1);
        }
    };

    match &cli.command {
        Some(Commands::Patterns) => {
            for pattern in config.reassembly().decoder.subscription_patterns() {
                println!("{pattern}");
            }
            return;
        }
        Some(Commands::List { limit }) => {
            if let Err(err) = list_images(&config, *limit) {
                error!("{err}");
                std::process::exit(1);
            }
            return;
        }
        _ => {}
    }

    let store = match open_store(&config) {
        Ok(store) => store,
        Err(err) => {
            error!("failed to open image store: {err}");
            std::process::exit(1);
        }
    };

    let stats = match &cli.command {
        Some(Commands::Replay { file }) => replay(&config, store, file).await,
        _ => run(&config, store).await,
    };
    log_stats(&stats);
    if stats.persistence_failures > 0 {
        std::process::exit(2);
    }
}
