use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Global runtime counters for the feeder.
///
/// Purpose:
/// - Track active exchanges and sockets
/// - Track throughput (received / forwarded trades)
/// - Track recovery activity (failovers, restarts, resubscriptions)
/// - Track processor output (purged points, emitted medians)
///
/// Counters only. Liveness state lives in each scraper instance,
/// never here.
#[derive(Default)]
pub struct RuntimeMetrics {
    pub exchanges_active: AtomicUsize,
    pub ws_connections_active: AtomicUsize,

    pub trades_received: AtomicUsize,
    pub trades_forwarded: AtomicUsize,
    pub parse_errors: AtomicUsize,
    pub read_errors: AtomicUsize,

    pub failovers: AtomicUsize,
    pub restarts: AtomicUsize,
    pub resubscriptions: AtomicUsize,

    pub points_purged: AtomicUsize,
    pub medians_emitted: AtomicUsize,
}

impl RuntimeMetrics {
    /// One-line summary for the periodic reporter.
    pub fn summary(&self) -> String {
        let get = |c: &AtomicUsize| c.load(Ordering::Relaxed);

        format!(
            "ex={} ws={} recv={} fwd={} parse_err={} read_err={} failovers={} restarts={} resubs={} purged={} medians={}",
            get(&self.exchanges_active),
            get(&self.ws_connections_active),
            get(&self.trades_received),
            get(&self.trades_forwarded),
            get(&self.parse_errors),
            get(&self.read_errors),
            get(&self.failovers),
            get(&self.restarts),
            get(&self.resubscriptions),
            get(&self.points_purged),
            get(&self.medians_emitted),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));
