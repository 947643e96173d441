//! Whole-connection liveness watchdog.
//!
//! The read loop stamps [`Liveness`] on every trade; the watchdog task
//! compares that stamp with the clock on every tick. The stamp is kept
//! in an atomic owned by the scraper instance, so a restarted instance
//! starts from a clean state and never sees its predecessor's value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, interval_at};

pub struct Liveness {
    genesis: Instant,
    last_seen_ms: AtomicU64,
}

impl Liveness {
    /// Starts counting silence from now.
    pub fn new() -> Self {
        Self {
            genesis: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    /// Records a trade receipt.
    pub fn touch(&self) {
        let offset = self.genesis.elapsed().as_millis() as u64;
        self.last_seen_ms.fetch_max(offset, Ordering::Relaxed);
    }

    /// Time since the last recorded trade (or since creation).
    pub fn silence(&self) -> Duration {
        let last = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.genesis.elapsed().saturating_sub(last)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs until the connection is silent for longer than `delay` or the
/// shutdown signal fires.
///
/// Returns the observed silence on expiry, `None` on shutdown.
pub async fn run_watchdog(
    liveness: &Liveness,
    delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Option<Duration> {
    let mut ticker = interval_at(Instant::now() + delay, delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let silence = liveness.silence();
                log::debug!("watchdog tick - silence {:?}", silence);
                if silence > delay {
                    return Some(silence);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return None;
                }
            }
        }
    }
}
