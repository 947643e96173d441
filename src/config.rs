use serde::Deserialize;
use std::time::Duration;

use crate::{models::ExchangePair, util};

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json` (or the file named by `FEEDER_CONFIG`).
//
// It defines:
// - The identity of this feeder node
// - Enabled exchanges and their pairs
// - Processor cadence and tolerance window
// - Queue capacities
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Identity used to attribute trade blocks
    #[serde(default)]
    pub node: NodeConfig,

    /// List of exchange configurations
    pub exchanges: Vec<ExchangeConfig>,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub queues: QueueConfig,
}

impl Config {
    /// Applies environment overrides on top of the file values.
    ///
    /// `TOLERANCE_SECONDS` replaces `processor.tolerance_seconds`.
    /// An unparseable value is logged and ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("TOLERANCE_SECONDS") {
            match raw.trim().parse::<i64>() {
                Ok(v) => self.processor.tolerance_seconds = v,
                Err(e) => log::error!("Parse TOLERANCE_SECONDS '{}': {}", raw, e),
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub id: String,

    #[serde(default = "default_node_name")]
    pub name: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            name: default_node_name(),
        }
    }
}

// ------------------------------------------------------------
// Exchange configuration
// ------------------------------------------------------------
//
// One entry per exchange. The dispatcher runs exactly one scraper
// per enabled entry and restarts it with the same pair list.
//
// IMPORTANT:
// - `pairs[].foreign_name` must be `BASE-QUOTE` in exchange terms
//   (e.g. "BTC-USDT"). Adapters derive stream names, subscription
//   symbols and watchdog keys from it.
//
#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    /// Exchange identifier ("binance", "kraken")
    pub name: String,

    /// Enables or disables this exchange at runtime
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub centralized: bool,

    #[serde(default)]
    pub blockchain: String,

    pub pairs: Vec<ExchangePair>,

    #[serde(default)]
    pub scraper: ScraperConfig,
}

// ------------------------------------------------------------
// Scraper tuning
// ------------------------------------------------------------
//
// Liveness and recovery parameters for one exchange.
//
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ScraperConfig {
    /// Whole-connection silence threshold
    #[serde(default = "default_watchdog_delay")]
    pub watchdog_delay_secs: u64,

    /// Consecutive read errors tolerated before a restart
    #[serde(default = "default_max_err_count")]
    pub max_err_count: u32,

    /// Wait between closing a broken socket and reporting it
    #[serde(default = "default_restart_wait")]
    pub restart_wait_secs: u64,

    /// Pause between the unsubscribe and subscribe frames
    #[serde(default = "default_resubscribe_delay")]
    pub resubscribe_delay_secs: u64,

    /// Default per-pair silence threshold (channel exchanges only)
    #[serde(default = "default_pair_watchdog")]
    pub pair_watchdog_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            watchdog_delay_secs: default_watchdog_delay(),
            max_err_count: default_max_err_count(),
            restart_wait_secs: default_restart_wait(),
            resubscribe_delay_secs: default_resubscribe_delay(),
            pair_watchdog_secs: default_pair_watchdog(),
        }
    }
}

impl ScraperConfig {
    pub fn watchdog_delay(&self) -> Duration {
        Duration::from_secs(self.watchdog_delay_secs.max(1))
    }

    pub fn restart_wait(&self) -> Duration {
        Duration::from_secs(self.restart_wait_secs)
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_secs(self.resubscribe_delay_secs)
    }

    /// Per-pair watchdog delay.
    ///
    /// Looked up under `<EXCHANGE>_WATCHDOG_<BASE>_<QUOTE>`; falls back
    /// to `pair_watchdog_secs` when the key is absent, unparseable, or
    /// the foreign name has no `BASE-QUOTE` shape.
    pub fn pair_watchdog_delay(
        &self,
        exchange: &str,
        pair: &ExchangePair,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Duration {
        let secs = util::watchdog_env_key(exchange, &pair.foreign_name)
            .and_then(|key| {
                let raw = lookup(&key)?;
                match raw.trim().parse::<u64>() {
                    Ok(v) => Some(v),
                    Err(e) => {
                        log::error!("Parse {} '{}': {}", key, raw, e);
                        None
                    }
                }
            })
            .unwrap_or(self.pair_watchdog_secs);

        Duration::from_secs(secs.max(1))
    }
}

// ------------------------------------------------------------
// Processor configuration
// ------------------------------------------------------------
//
// Points older than `now - tolerance_seconds` are discarded before
// every evaluation. Evaluations run every `interval_secs`.
//
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProcessorConfig {
    #[serde(default = "default_tolerance")]
    pub tolerance_seconds: i64,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            tolerance_seconds: default_tolerance(),
            interval_secs: default_interval(),
        }
    }
}

// ------------------------------------------------------------
// Queue capacities
// ------------------------------------------------------------
//
// The trade queue is bounded on purpose: a slow processor makes
// scrapers wait instead of dropping trades.
//
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct QueueConfig {
    #[serde(default = "default_trades_capacity")]
    pub trades: usize,

    #[serde(default = "default_failover_capacity")]
    pub failover: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            trades: default_trades_capacity(),
            failover: default_failover_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_node_id() -> String {
    "local".into()
}

fn default_node_name() -> String {
    "decentral-feeder".into()
}

fn default_watchdog_delay() -> u64 {
    60
}

fn default_max_err_count() -> u32 {
    20
}

fn default_restart_wait() -> u64 {
    5
}

fn default_resubscribe_delay() -> u64 {
    2
}

fn default_pair_watchdog() -> u64 {
    60
}

fn default_tolerance() -> i64 {
    20
}

fn default_interval() -> u64 {
    10
}

fn default_trades_capacity() -> usize {
    10_000
}

fn default_failover_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;

    const MINIMAL: &str = r#"{
        "exchanges": [
            {
                "name": "kraken",
                "enabled": true,
                "pairs": [
                    {
                        "foreign_name": "BTC-USD",
                        "underlying_pair": {
                            "quote_token": { "address": "0x0000000000000000000000000000000000000000", "blockchain": "Bitcoin", "symbol": "BTC" },
                            "base_token": { "address": "0x0000000000000000000000000000000000000000", "blockchain": "Fiat", "symbol": "USD" }
                        }
                    }
                ],
                "scraper": { "watchdog_delay_secs": 30 }
            }
        ]
    }"#;

    #[test]
    fn missing_sections_use_defaults() {
        let cfg: Config = serde_json::from_str(MINIMAL).unwrap();

        assert_eq!(cfg.processor, ProcessorConfig::default());
        assert_eq!(cfg.queues.trades, 10_000);
        assert_eq!(cfg.node.id, "local");

        let ex = &cfg.exchanges[0];
        assert!(ex.centralized);
        assert_eq!(ex.pairs[0].foreign_name, "BTC-USD");
        assert_eq!(ex.pairs[0].underlying_pair.quote_token.symbol, "BTC");
        assert_eq!(ex.scraper.watchdog_delay_secs, 30);
        assert_eq!(ex.scraper.max_err_count, 20);
        assert_eq!(ex.scraper.resubscribe_delay(), Duration::from_secs(2));
    }

    #[test]
    fn tolerance_env_override() {
        let mut cfg: Config = serde_json::from_str(MINIMAL).unwrap();

        cfg.apply_env_overrides(|k| (k == "TOLERANCE_SECONDS").then(|| "45".to_string()));
        assert_eq!(cfg.processor.tolerance_seconds, 45);

        cfg.apply_env_overrides(|_| Some("soon".to_string()));
        assert_eq!(cfg.processor.tolerance_seconds, 45, "garbage keeps the previous value");
    }

    #[test]
    fn pair_watchdog_delay_lookup() {
        let scraper = ScraperConfig::default();
        let pair = exchange_pair(btc(), usdt(), "btc-usdt");

        let found = scraper.pair_watchdog_delay("kraken", &pair, |k| {
            (k == "KRAKEN_WATCHDOG_BTC_USDT").then(|| "120".to_string())
        });
        assert_eq!(found, Duration::from_secs(120));

        let absent = scraper.pair_watchdog_delay("kraken", &pair, |_| None);
        assert_eq!(absent, Duration::from_secs(60));

        let broken = scraper.pair_watchdog_delay("kraken", &pair, |_| Some("x".into()));
        assert_eq!(broken, Duration::from_secs(60));
    }
}
