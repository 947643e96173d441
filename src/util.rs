/// Utility helpers shared by adapters and the collector runtime.
///
/// IMPORTANT:
/// - No exchange-specific business logic should live here.
/// - This module must remain lightweight and deterministic.
///
use chrono::{DateTime, Utc};

/// Returns the value of an environment variable or `default`.
pub fn getenv(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Environment lookup usable wherever a `Fn(&str) -> Option<String>`
/// is expected.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Builds the per-pair watchdog key for an exchange.
///
/// Examples:
/// - ("kraken", "BTC-USD")  -> "KRAKEN_WATCHDOG_BTC_USD"
/// - ("binance", "eth-usdt") -> "BINANCE_WATCHDOG_ETH_USDT"
///
/// Returns `None` when the foreign name is not `BASE-QUOTE`.
pub fn watchdog_env_key(exchange: &str, foreign_name: &str) -> Option<String> {
    let (base, quote) = foreign_name.split_once('-')?;
    if base.is_empty() || quote.is_empty() {
        return None;
    }

    Some(format!(
        "{}_WATCHDOG_{}_{}",
        exchange.to_uppercase(),
        base.to_uppercase(),
        quote.to_uppercase()
    ))
}

/// Converts a Unix timestamp in milliseconds into a UTC time.
///
/// Out-of-range input yields the zero time.
pub fn time_from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_key_is_upper_case() {
        assert_eq!(
            watchdog_env_key("kraken", "btc-usd").as_deref(),
            Some("KRAKEN_WATCHDOG_BTC_USD")
        );
        assert_eq!(watchdog_env_key("kraken", "BTCUSD"), None);
    }

    #[test]
    fn millisecond_timestamps() {
        let t = time_from_ms(1_689_497_611_250);
        assert_eq!(t.timestamp(), 1_689_497_611);
        assert_eq!(t.timestamp_subsec_millis(), 250);
    }
}
