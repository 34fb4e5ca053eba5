use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use stockledger_core::Clock;
use stockledger_events::EventBus;

use crate::catalog::Catalog;
use crate::config::LedgerConfig;
use crate::service::{StockEnvelope, StockLedgerService};
use crate::store::LedgerStore;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Pause between sweeps; the first sweep runs one interval after spawn.
    pub interval: Duration,
    /// Thread name, also used in logs.
    pub name: String,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self::from(&LedgerConfig::default())
    }
}

impl From<&LedgerConfig> for SweeperConfig {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            interval: config.sweep_interval(),
            name: "stock-reservation-sweeper".to_string(),
        }
    }
}

impl SweeperConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Sweeper runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweeperStats {
    pub runs: u64,
    pub released: u64,
    /// Variants that could not be swept plus sweeps that failed outright.
    pub failures: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
}

/// Handle to a running sweeper. Dropping it also stops the sweeper, after the
/// sweep in progress.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl SweeperHandle {
    /// Request shutdown and wait for the sweeper to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> SweeperStats {
        lock(&self.stats).clone()
    }
}

/// Calls [`StockLedgerService::sweep_expired`] on a fixed interval.
#[derive(Debug)]
pub struct ReservationSweeper;

impl ReservationSweeper {
    pub fn spawn<S, C, B, K>(
        service: Arc<StockLedgerService<S, C, B, K>>,
        config: SweeperConfig,
    ) -> SweeperHandle
    where
        S: LedgerStore + 'static,
        C: Catalog + 'static,
        B: EventBus<StockEnvelope> + 'static,
        K: Clock + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(SweeperStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || sweeper_loop(&service, &config, &shutdown_rx, &stats_clone))
            .expect("failed to spawn reservation sweeper thread");

        SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }
}

fn sweeper_loop<S, C, B, K>(
    service: &StockLedgerService<S, C, B, K>,
    config: &SweeperConfig,
    shutdown_rx: &mpsc::Receiver<()>,
    stats: &Mutex<SweeperStats>,
) where
    S: LedgerStore,
    C: Catalog,
    B: EventBus<StockEnvelope>,
    K: Clock,
{
    info!(sweeper = %config.name, interval_ms = config.interval.as_millis() as u64, "reservation sweeper started");
    let start_time = Instant::now();

    loop {
        match shutdown_rx.recv_timeout(config.interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let result = service.sweep_expired();

        let mut s = lock(stats);
        s.runs += 1;
        s.last_run_at = Some(Utc::now());
        s.uptime_secs = start_time.elapsed().as_secs();
        match result {
            Ok(report) => {
                s.released += report.released as u64;
                s.failures += report.failures as u64;
                debug!(sweeper = %config.name, released = report.released, failures = report.failures, "sweep finished");
            }
            Err(e) => {
                s.failures += 1;
                error!(sweeper = %config.name, error = %e, "reservation sweep failed");
            }
        }
    }

    info!(sweeper = %config.name, "reservation sweeper stopped");
}

fn lock(stats: &Mutex<SweeperStats>) -> MutexGuard<'_, SweeperStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}
