//! Engine lifecycle
//!
//! Composes the store, tag index, broadcast bus, and connection server
//! into one start/stop unit. The engine owns the background tasks (the
//! acceptor, the trim pass, the status line) and the shutdown signal
//! they all watch.

use crate::command::Dispatcher;
use crate::config::{CacheConfig, StorageKind};
use crate::net::{BroadcastBus, CacheServer, NetError, ServerStats};
use crate::store::{ceiling_bytes, total_system_bytes, CacheStore, GzipCodec, PlainCodec, ValueCodec};
use crate::tags::TagIndex;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Seconds between trim passes over the store.
const TRIM_INTERVAL_SECS: u64 = 15;

/// Seconds between status lines.
const STATUS_INTERVAL_SECS: u64 = 30;

/// How long `stop` waits for in-flight work before aborting tasks.
const STOP_GRACE: Duration = Duration::from_millis(500);

struct Running {
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

/// The cache host: everything between the listening socket and the store.
pub struct CacheEngine {
    cfg: Arc<CacheConfig>,
    store: Arc<CacheStore>,
    tags: Arc<TagIndex>,
    bus: Arc<BroadcastBus>,
    stats: Arc<ServerStats>,
    shutdown: watch::Sender<bool>,
    running: Mutex<Option<Running>>,
}

impl CacheEngine {
    pub fn new(cfg: CacheConfig) -> Self {
        let bus = Arc::new(BroadcastBus::new());

        let codec: Box<dyn ValueCodec> = match cfg.storage_provider {
            StorageKind::Plain => Box::new(PlainCodec),
            StorageKind::Gzip => Box::new(GzipCodec),
        };
        let ceiling = ceiling_bytes(total_system_bytes(), cfg.cache_memory_limit_percentage);
        let store = Arc::new(CacheStore::new(codec, bus.clone(), ceiling));

        let (shutdown, _) = watch::channel(false);
        Self {
            cfg: Arc::new(cfg),
            store,
            tags: Arc::new(TagIndex::new()),
            bus,
            stats: Arc::new(ServerStats::default()),
            shutdown,
            running: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn tags(&self) -> &Arc<TagIndex> {
        &self.tags
    }

    pub fn bus(&self) -> &Arc<BroadcastBus> {
        &self.bus
    }

    pub fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().unwrap().as_ref().map(|r| r.local_addr)
    }

    /// Bind the listener and bring up the background tasks.
    ///
    /// Starting an already-started engine just returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, NetError> {
        if let Some(running) = self.running.lock().unwrap().as_ref() {
            return Ok(running.local_addr);
        }

        // Re-arm the signal so a stopped engine can be started again.
        self.shutdown.send_replace(false);

        let listener = TcpListener::bind(("0.0.0.0", self.cfg.port)).await?;
        let local_addr = listener.local_addr()?;

        let dispatcher = Arc::new(Dispatcher::new(self.store.clone(), self.tags.clone()));
        let server = Arc::new(CacheServer::new(
            self.cfg.clone(),
            dispatcher,
            self.bus.clone(),
            self.stats.clone(),
        ));

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(server.run(listener, self.shutdown.subscribe())));
        tasks.push(tokio::spawn(trim_loop(
            self.store.clone(),
            self.tags.clone(),
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(status_loop(
            self.store.clone(),
            self.bus.clone(),
            self.stats.clone(),
            self.shutdown.subscribe(),
        )));

        *self.running.lock().unwrap() = Some(Running { local_addr, tasks });
        info!(
            "cache host listening on {} ({} connection permits)",
            local_addr, self.cfg.maximum_connections
        );
        Ok(local_addr)
    }

    /// Signal shutdown, give in-flight dispatches a short grace period,
    /// then reap the background tasks. Safe to call more than once.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().unwrap().take() else {
            return;
        };
        info!("stopping cache host on {}", running.local_addr);
        self.shutdown.send_replace(true);

        for mut task in running.tasks {
            if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        info!("cache host stopped");
    }
}

/// Reap expired entries and trim the evictable set on a fixed cadence,
/// reconciling the tag index with whatever left the store.
async fn trim_loop(
    store: Arc<CacheStore>,
    tags: Arc<TagIndex>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(TRIM_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let report = store.trim_pass();
        for key in report.removed() {
            tags.remove(key);
        }
        if !report.reaped.is_empty() || !report.evicted.is_empty() {
            debug!(
                "trim pass: {} expired, {} evicted",
                report.reaped.len(),
                report.evicted.len()
            );
        }
    }
}

/// Periodic one-line health summary.
async fn status_loop(
    store: Arc<CacheStore>,
    bus: Arc<BroadcastBus>,
    stats: Arc<ServerStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(STATUS_INTERVAL_SECS));

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        info!(
            "status: {} connections | {} entries | {} KiB | frames {}/{} in/out",
            bus.subscriber_count(),
            store.len(),
            store.approx_bytes() / 1024,
            stats.frames_in.load(Ordering::Relaxed),
            stats.frames_out.load(Ordering::Relaxed),
        );
    }
}
