use serde_json::Value;

use crate::models::{ExchangePair, TickerPairMap, Trade};

/// Direction of a channel control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeAction {
    Subscribe,
    Unsubscribe,
}

impl SubscribeAction {
    pub fn method(self) -> &'static str {
        match self {
            SubscribeAction::Subscribe => "subscribe",
            SubscribeAction::Unsubscribe => "unsubscribe",
        }
    }
}

/// Outcome of decoding one WebSocket text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    /// One or more normalized trades, in delivery order.
    Trades(Vec<Trade>),

    /// Heartbeats, acknowledgements and anything else without trades.
    Control,

    /// Malformed payload. The frame is dropped, the socket stays up.
    Error(String),
}

/// ExchangeAdapter is the abstraction layer between:
/// - The generic scraper runtime
/// - Exchange-specific WebSocket APIs
///
/// Each exchange implementation must:
/// - Build its endpoint URL from the configured pairs
/// - Build subscribe / unsubscribe frames if it multiplexes channels
/// - Parse raw frames into normalized `Trade`s
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - One adapter instance is shared by every scraper instance of
///   its exchange, including restarted ones
///
pub trait ExchangeAdapter: Send + Sync {
    /// Canonical exchange name. Must match `exchanges[].name` in
    /// the configuration.
    fn name(&self) -> &'static str;

    /// Full WebSocket URL for the given pair set.
    fn ws_url(&self, pairs: &[ExchangePair]) -> String;

    /// True when pairs are subscribed with control frames over the
    /// socket, which enables per-pair watchdogs and resubscription.
    fn channel_subscriptions(&self) -> bool {
        false
    }

    /// Builds a control frame for one pair.
    ///
    /// Returns `None` for exchanges that subscribe through the URL.
    fn build_subscribe_message(&self, _action: SubscribeAction, _pair: &ExchangePair) -> Option<Value> {
        None
    }

    /// Parses a raw text frame.
    ///
    /// IMPORTANT:
    /// - This function must NEVER panic
    /// - Unknown tickers must not produce trades with empty assets
    fn parse_message(&self, raw: &str, tickers: &TickerPairMap) -> ParseResult;
}

/// Reads a numeric field that may be sent as a JSON number or string.
///
/// A missing or non-numeric field is logged and read as zero; the
/// surrounding trade is still emitted.
pub fn number_field(exchange: &str, field: &str, v: Option<&Value>) -> f64 {
    let parsed = match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        _ => None,
    };

    parsed.unwrap_or_else(|| {
        log::error!("{} - parse {}: {:?}", exchange, field, v);
        0.0
    })
}
