use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name carried by aggregated filter points.
pub const MEDIAN_FILTER: &str = "median";

// ------------------------------------------------------------
// Asset
// ------------------------------------------------------------
//
// Identity is (address, blockchain). Symbol, name and decimals are
// descriptive only and never take part in equality or hashing, so two
// assets with the same address on different chains stay distinct.
//
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Asset {
    pub address: String,
    pub blockchain: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub decimals: u8,
}

impl PartialEq for Asset {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.blockchain == other.blockchain
    }
}

impl Eq for Asset {}

impl Hash for Asset {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.blockchain.hash(state);
    }
}

/// Static exchange description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub name: String,
    pub centralized: bool,
    pub blockchain: String,
}

// ------------------------------------------------------------
// Pair
// ------------------------------------------------------------
//
// Aggregation key. Equality is the ordered pair of asset identities.
//
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub quote_token: Asset,
    pub base_token: Asset,
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.quote_token.symbol, self.base_token.symbol)
    }
}

/// Maps a canonical pair to the ticker an exchange API expects.
///
/// `foreign_name` is always `BASE-QUOTE` in exchange terms,
/// e.g. `BTC-USDT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePair {
    pub underlying_pair: Pair,
    pub foreign_name: String,
}

impl ExchangePair {
    /// Splits the foreign name into its (base, quote) symbols.
    pub fn symbols(&self) -> Option<(&str, &str)> {
        let (base, quote) = self.foreign_name.split_once('-')?;
        if base.is_empty() || quote.is_empty() {
            return None;
        }
        Some((base, quote))
    }

    /// Separator-free upper-case ticker, e.g. `BTCUSDT`.
    pub fn ticker(&self) -> String {
        self.foreign_name.replace('-', "").to_uppercase()
    }
}

/// Reverse lookup from an exchange ticker to the canonical pair.
pub type TickerPairMap = HashMap<String, Pair>;

pub fn make_ticker_pair_map(pairs: &[ExchangePair]) -> TickerPairMap {
    pairs
        .iter()
        .map(|p| (p.ticker(), p.underlying_pair.clone()))
        .collect()
}

// ------------------------------------------------------------
// Trade
// ------------------------------------------------------------
//
// Produced once per exchange tick, never mutated afterwards.
//
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub quote_token: Asset,
    pub base_token: Asset,
    pub price: f64,
    pub volume: f64,
    pub time: DateTime<Utc>,
    pub exchange: Exchange,
    pub pool_address: String,
    pub foreign_trade_id: String,
    pub estimated_usd_price: f64,
}

impl Trade {
    pub fn pair(&self) -> Pair {
        Pair {
            quote_token: self.quote_token.clone(),
            base_token: self.base_token.clone(),
        }
    }

    /// Raw observation consumed by the processor.
    pub fn filter_point(&self) -> FilterPoint {
        FilterPoint {
            pair: self.pair(),
            value: self.price,
            time: self.time,
            name: String::new(),
        }
    }
}

/// A single scalar price observation for a pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPoint {
    pub pair: Pair,
    pub value: f64,
    pub time: DateTime<Utc>,
    pub name: String,
}

/// Identity of a running scraper node or instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperId {
    pub id: String,
    pub name: String,
    pub registration_time: DateTime<Utc>,
}

/// Batch of trades attributed to one scraper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradesBlock {
    pub trades: Vec<Trade>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub scraper_id: ScraperId,
}

impl TradesBlock {
    /// Start and end are the earliest and latest trade times;
    /// both are the zero time for an empty block.
    pub fn new(trades: Vec<Trade>, scraper_id: ScraperId) -> Self {
        let start_time = trades.iter().map(|t| t.time).min().unwrap_or_default();
        let end_time = trades.iter().map(|t| t.time).max().unwrap_or_default();

        Self {
            trades,
            start_time,
            end_time,
            scraper_id,
        }
    }
}
