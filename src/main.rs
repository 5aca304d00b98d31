//! Tagcache host binary
//!
//! Loads configuration (JSON file plus CLI overrides), installs the
//! configured logger, and runs the cache engine until ctrl-c.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tagcache::{init_logging, CacheConfig, CacheEngine, LoggerKind, StorageKind};
use tracing::{error, info};

/// Tagcache version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "tagcache", version, about = "Tagcache: in-memory key/value cache host")]
struct Args {
    /// JSON config file; CLI flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Concurrent connection cap
    #[arg(long)]
    maximum_connections: Option<usize>,

    /// Per-socket read buffer, bytes
    #[arg(long)]
    message_buffer_size: Option<usize>,

    /// Idle/operation timeout, seconds
    #[arg(long)]
    communication_timeout_secs: Option<u64>,

    /// Max decoded frame payload, bytes
    #[arg(long)]
    maximum_message_size: Option<usize>,

    /// Store memory target, percent of total memory [5, 90]
    #[arg(long)]
    cache_memory_limit_percentage: Option<u8>,

    /// Value transform: plain, gzip
    #[arg(long)]
    storage_provider: Option<String>,

    /// Logger: fmt, json, compact (unknown names fall back to fmt)
    #[arg(long)]
    logger: Option<String>,
}

fn build_config(args: &Args) -> Result<CacheConfig, Box<dyn std::error::Error>> {
    let mut cfg = match &args.config {
        Some(path) => CacheConfig::from_file(path)?,
        None => CacheConfig::default(),
    };

    if let Some(port) = args.port {
        cfg.port = port;
    }
    if let Some(n) = args.maximum_connections {
        cfg.maximum_connections = n;
    }
    if let Some(n) = args.message_buffer_size {
        cfg.message_buffer_size = n;
    }
    if let Some(n) = args.communication_timeout_secs {
        cfg.communication_timeout_secs = n;
    }
    if let Some(n) = args.maximum_message_size {
        cfg.maximum_message_size = n;
    }
    if let Some(n) = args.cache_memory_limit_percentage {
        cfg.cache_memory_limit_percentage = n;
    }
    if let Some(name) = &args.storage_provider {
        cfg.storage_provider = name.parse::<StorageKind>()?;
    }
    if let Some(name) = &args.logger {
        cfg.logger = LoggerKind::from_name(name);
    }

    cfg.validate()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let cfg = match build_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(cfg.logger);

    info!("Tagcache v{}", VERSION);
    info!(
        "port {} | {} connections max | {}% memory target | {} storage",
        cfg.port,
        cfg.maximum_connections,
        cfg.cache_memory_limit_percentage,
        match cfg.storage_provider {
            StorageKind::Plain => "plain",
            StorageKind::Gzip => "gzip",
        }
    );

    let engine = Arc::new(CacheEngine::new(cfg));
    if let Err(e) = engine.start().await {
        error!("failed to start: {}", e);
        std::process::exit(1);
    }

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down...");
    engine.stop().await;
}
