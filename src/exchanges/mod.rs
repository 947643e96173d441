//! Exchange adapter registry and factory
//!
//! This module provides:
//! - Central registration of all supported exchanges
//! - A factory function to resolve adapters by name
//!
//! All exchange-specific logic must live in dedicated adapter modules.
//! The rest of the application must interact exclusively through
//! the `ExchangeAdapter` trait.

pub mod adapter;
pub mod binance;
pub mod kraken_v2;

use std::sync::Arc;
use adapter::ExchangeAdapter;

/// Returns an exchange adapter instance by name.
///
/// CONTRACT:
/// - `name` MUST match the `exchanges[].name` field in config.json
/// - Adapter names are lowercase and stable
///
/// THREADING:
/// - Adapters are wrapped in `Arc` and shared by every scraper
///   instance of their exchange
///
pub fn get_adapter(name: &str) -> Option<Arc<dyn ExchangeAdapter>> {
    match name.to_lowercase().as_str() {
        "binance" => Some(Arc::new(binance::BinanceAdapter)),
        "kraken" => Some(Arc::new(kraken_v2::KrakenV2Adapter)),
        _ => None,
    }
}
