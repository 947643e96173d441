use std::sync::{Arc, atomic::Ordering};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{
    collector::runner::{ScraperContext, run_scraper},
    config::{ExchangeConfig, ScraperConfig},
    error::Failover,
    exchanges::adapter::ExchangeAdapter,
    metrics::METRICS,
    models::{ExchangePair, ScraperId, Trade},
};

/// Static description of one exchange the dispatcher keeps alive.
#[derive(Clone)]
pub struct ExchangeSpec {
    pub adapter: Arc<dyn ExchangeAdapter>,
    pub pairs: Vec<ExchangePair>,
    pub scraper: ScraperConfig,
}

impl ExchangeSpec {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, cfg: &ExchangeConfig) -> Self {
        Self {
            adapter,
            pairs: cfg.pairs.clone(),
            scraper: cfg.scraper.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.adapter.name()
    }
}

/// Starts scraper instances.
///
/// The dispatcher only decides *when* to start one; how it runs is up
/// to the launcher.
pub trait ScraperLauncher: Send + Sync {
    fn launch(
        &self,
        spec: &ExchangeSpec,
        id: &ScraperId,
        instance: u64,
        failover_tx: mpsc::Sender<Failover>,
    ) -> JoinHandle<()>;
}

/// Launches WebSocket scrapers that feed the shared trade queue.
pub struct WsLauncher {
    trades_tx: mpsc::Sender<Trade>,
}

impl WsLauncher {
    pub fn new(trades_tx: mpsc::Sender<Trade>) -> Self {
        Self { trades_tx }
    }
}

impl ScraperLauncher for WsLauncher {
    fn launch(
        &self,
        spec: &ExchangeSpec,
        id: &ScraperId,
        instance: u64,
        failover_tx: mpsc::Sender<Failover>,
    ) -> JoinHandle<()> {
        log::debug!("launch {} registered at {}", id.id, id.registration_time);

        tokio::spawn(run_scraper(ScraperContext {
            adapter: spec.adapter.clone(),
            pairs: spec.pairs.clone(),
            settings: spec.scraper.clone(),
            instance,
            trades_tx: self.trades_tx.clone(),
            failover_tx,
        }))
    }
}

struct Slot {
    spec: ExchangeSpec,
    instance: u64,
    handle: Option<JoinHandle<()>>,
}

/// Keeps exactly one scraper per exchange running.
///
/// DESIGN:
/// - The failure queue is the single recovery path
/// - A report is acted on only if it comes from the exchange's
///   current instance; late or repeated reports are dropped
/// - A replacement starts only after the previous task has exited
///
pub struct Dispatcher<L> {
    launcher: L,
    slots: Vec<Slot>,
    next_instance: u64,
    failover_tx: mpsc::Sender<Failover>,
    failover_rx: mpsc::Receiver<Failover>,
}

impl<L: ScraperLauncher> Dispatcher<L> {
    pub fn new(launcher: L, specs: Vec<ExchangeSpec>, failover_capacity: usize) -> Self {
        let (failover_tx, failover_rx) = mpsc::channel(failover_capacity.max(1));

        Self {
            launcher,
            slots: specs
                .into_iter()
                .map(|spec| Slot {
                    spec,
                    instance: 0,
                    handle: None,
                })
                .collect(),
            next_instance: 1,
            failover_tx,
            failover_rx,
        }
    }

    /// Starts one scraper per configured exchange, in configuration order.
    pub fn start_all(&mut self) {
        for idx in 0..self.slots.len() {
            self.launch_slot(idx);
        }
        METRICS.exchanges_active.store(self.slots.len(), Ordering::Relaxed);
    }

    /// Runs forever: starts every scraper, then serves the failure queue.
    pub async fn run(mut self) {
        self.start_all();

        while let Some(failover) = self.failover_rx.recv().await {
            self.handle_failover(failover).await;
        }
    }

    /// Restarts the reporting exchange if the report is current.
    ///
    /// Returns the new instance number, or `None` if the report was
    /// ignored.
    pub async fn handle_failover(&mut self, failover: Failover) -> Option<u64> {
        let Some(idx) = self.slots.iter().position(|s| s.spec.name() == failover.exchange) else {
            log::warn!("failover for unknown exchange {}", failover.exchange);
            return None;
        };

        if self.slots[idx].instance != failover.instance {
            log::debug!(
                "{} - ignore failover from #{} (current #{})",
                failover.exchange,
                failover.instance,
                self.slots[idx].instance
            );
            return None;
        }

        log::warn!("{} - failover: {}", failover.exchange, failover.reason);

        // wait for full teardown of the previous instance
        if let Some(handle) = self.slots[idx].handle.take() {
            if let Err(e) = handle.await {
                log::error!("{} - scraper task ended abnormally: {}", failover.exchange, e);
            }
        }

        METRICS.restarts.fetch_add(1, Ordering::Relaxed);
        Some(self.launch_slot(idx))
    }

    fn launch_slot(&mut self, idx: usize) -> u64 {
        let instance = self.next_instance;
        self.next_instance += 1;

        let slot = &mut self.slots[idx];
        let id = ScraperId {
            id: format!("{}-{}", slot.spec.name(), instance),
            name: slot.spec.name().to_string(),
            registration_time: Utc::now(),
        };

        log::info!("{} - start scraper #{}", slot.spec.name(), instance);
        slot.handle = Some(self.launcher.launch(&slot.spec, &id, instance, self.failover_tx.clone()));
        slot.instance = instance;

        instance
    }
}
