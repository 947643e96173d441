use chrono::Utc;
use serde_json::{Value, json};

use crate::models::{Exchange, ExchangePair, TickerPairMap, Trade};

use super::adapter::{ExchangeAdapter, ParseResult, SubscribeAction, number_field};

/// Kraken WebSocket v2 adapter (Spot)
///
/// WS:
/// wss://ws.kraken.com/v2
///
/// Supports:
/// - Trade batches (several trades per frame)
/// - Multiple symbols per WS, one subscription frame per pair
/// - Per-pair unsubscribe / resubscribe
pub struct KrakenV2Adapter;

impl KrakenV2Adapter {
    /// Kraken symbol for a pair, e.g. "BTC-USD" -> "BTC/USD".
    fn symbol(pair: &ExchangePair) -> String {
        pair.foreign_name.to_uppercase().replace('-', "/")
    }
}

impl ExchangeAdapter for KrakenV2Adapter {
    fn name(&self) -> &'static str {
        "kraken"
    }

    fn ws_url(&self, _pairs: &[ExchangePair]) -> String {
        "wss://ws.kraken.com/v2".to_string()
    }

    fn channel_subscriptions(&self) -> bool {
        true
    }

    fn build_subscribe_message(&self, action: SubscribeAction, pair: &ExchangePair) -> Option<Value> {
        Some(json!({
            "method": action.method(),
            "params": {
                "channel": "trade",
                "symbol": [Self::symbol(pair)]
            }
        }))
    }

    fn parse_message(&self, raw: &str, tickers: &TickerPairMap) -> ParseResult {
        let v: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => return ParseResult::Error(e.to_string()),
        };

        // Heartbeats, status and subscribe acks carry no trades.
        if v.get("channel").and_then(Value::as_str) != Some("trade") {
            return ParseResult::Control;
        }

        let Some(data) = v.get("data").and_then(Value::as_array) else {
            return ParseResult::Error("trade message without data".into());
        };

        let mut trades = Vec::with_capacity(data.len());

        for t in data {
            let symbol = t.get("symbol").and_then(Value::as_str).unwrap_or("");
            let pair = match symbol.split_once('/') {
                Some((base, quote)) => tickers.get(&format!("{}{}", base, quote).to_uppercase()),
                None => None,
            };
            let Some(pair) = pair else {
                log::debug!("kraken - skip trade for unknown symbol '{}'", symbol);
                continue;
            };

            let price = number_field(self.name(), "price", t.get("price"));
            let mut volume = number_field(self.name(), "qty", t.get("qty"));

            // Observed sign convention: one unit is subtracted, the
            // magnitude is not negated.
            if t.get("side").and_then(Value::as_str) == Some("sell") {
                volume -= 1.0;
            }

            let time = t
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| {
                    log::error!("kraken - parse timestamp: {:?}", t.get("timestamp"));
                    Default::default()
                });

            let foreign_trade_id = match t.get("trade_id") {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(s)) => s.clone(),
                _ => String::new(),
            };

            trades.push(Trade {
                quote_token: pair.quote_token.clone(),
                base_token: pair.base_token.clone(),
                price,
                volume,
                time,
                exchange: Exchange {
                    name: self.name().to_string(),
                    centralized: true,
                    blockchain: String::new(),
                },
                pool_address: String::new(),
                foreign_trade_id,
                estimated_usd_price: 0.0,
            });
        }

        if trades.is_empty() {
            ParseResult::Control
        } else {
            ParseResult::Trades(trades)
        }
    }
}
