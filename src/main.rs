// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// - config:     Configuration structs loaded from JSON
// - models:     Shared value types (assets, pairs, trades, points)
// - error:      Failure events reported by scrapers
// - util:       Small shared helpers (env, time, watchdog keys)
// - exchanges:  Exchange adapters and adapter registry
// - collector:  Scraper runtime, watchdogs, dispatcher
// - processor:  Grouping, median and stale-point purge
// - sink:       Output interface of the processor
// - metrics:    Global runtime counters
//
mod collector;
mod config;
mod error;
mod exchanges;
mod metrics;
mod models;
mod processor;
mod sink;
mod util;

use rustls::crypto::{CryptoProvider, ring};

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::sleep;

use collector::dispatcher::{Dispatcher, ExchangeSpec, WsLauncher};
use config::Config;
use exchanges::get_adapter;
use metrics::METRICS;
use models::{Exchange, ScraperId};
use processor::Processor;
use sink::{Datastore, LogSink};

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize logging and the rustls crypto backend
// - Load configuration
// - Start the processor and the scraper dispatcher
// - Keep the process alive indefinitely
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // rustls >= 0.23 requires an explicit CryptoProvider, installed
    // exactly once before the first TLS handshake.
    CryptoProvider::install_default(ring::default_provider())
        .expect("failed to install rustls CryptoProvider");

    let path = util::getenv("FEEDER_CONFIG", "config.json");
    let mut config = load_config(&path)?;
    config.apply_env_overrides(util::env_lookup);

    let sink: Arc<dyn Datastore> = Arc::new(LogSink);
    let (trades_tx, trades_rx) = mpsc::channel(config.queues.trades.max(1));

    // --------------------------------------------------------
    // Resolve enabled exchanges
    // --------------------------------------------------------
    let mut specs = Vec::new();
    for exchange_cfg in config.exchanges.iter().filter(|e| e.enabled) {
        let Some(adapter) = get_adapter(&exchange_cfg.name) else {
            log::error!("Exchange '{}' is not supported", exchange_cfg.name);
            continue;
        };
        if exchange_cfg.pairs.is_empty() {
            log::warn!("Exchange '{}' has no pairs, skipped", exchange_cfg.name);
            continue;
        }

        let exchange = Exchange {
            name: adapter.name().to_string(),
            centralized: exchange_cfg.centralized,
            blockchain: exchange_cfg.blockchain.clone(),
        };
        if let Err(e) = sink.set_exchange(&exchange).await {
            log::error!("register exchange {}: {}", exchange.name, e);
        }

        specs.push(ExchangeSpec::new(adapter, exchange_cfg));
    }

    if specs.is_empty() {
        anyhow::bail!("no supported exchange enabled in {}", path);
    }

    // --------------------------------------------------------
    // Processor
    // --------------------------------------------------------
    let node = ScraperId {
        id: config.node.id.clone(),
        name: config.node.name.clone(),
        registration_time: Utc::now(),
    };
    let processor = Processor::new(&config.processor, node, sink.clone());
    tokio::spawn(processor.run(trades_rx));

    // --------------------------------------------------------
    // Metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    tokio::spawn(async {
        loop {
            sleep(Duration::from_secs(10)).await;
            log::info!("[METRICS] {}", METRICS.summary());
        }
    });

    // --------------------------------------------------------
    // Dispatcher: runs forever, restarting failed scrapers
    // --------------------------------------------------------
    let dispatcher = Dispatcher::new(
        WsLauncher::new(trades_tx),
        specs,
        config.queues.failover,
    );
    dispatcher.run().await;

    Ok(())
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk and deserializes
// it into the strongly typed `Config` structure.
//
fn load_config(path: &str) -> anyhow::Result<Config> {
    let data = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("read config {}: {}", path, e))?;
    let cfg = serde_json::from_str(&data)?;
    Ok(cfg)
}
