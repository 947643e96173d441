//! Processor: turns the interleaved trade stream of all exchanges into
//! one median point per pair on every evaluation tick.
//!
//! The tick never waits for new trades. Between ticks, trades are
//! buffered as raw filter points; on each tick the buffer is purged
//! of stale points and the remainder is aggregated. Aggregation does
//! not consume the buffer, points leave it only by ageing out.

pub mod filters;

use std::sync::{Arc, atomic::Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};

use crate::{
    config::ProcessorConfig,
    metrics::METRICS,
    models::{FilterPoint, ScraperId, Trade, TradesBlock},
    sink::Datastore,
};

pub struct Processor {
    buffer: Vec<FilterPoint>,
    pending_trades: Vec<Trade>,
    tolerance_seconds: i64,
    interval: Duration,
    node: ScraperId,
    sink: Arc<dyn Datastore>,
}

impl Processor {
    pub fn new(config: &ProcessorConfig, node: ScraperId, sink: Arc<dyn Datastore>) -> Self {
        Self {
            buffer: Vec::new(),
            pending_trades: Vec::new(),
            tolerance_seconds: config.tolerance_seconds,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            node,
            sink,
        }
    }

    /// Buffers one trade as a raw observation.
    pub fn ingest(&mut self, trade: Trade) {
        self.buffer.push(trade.filter_point());
        self.pending_trades.push(trade);
    }

    /// Purges stale points and returns one median per pair, stamped
    /// with `now`.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> Vec<FilterPoint> {
        let (retained, removed) =
            filters::remove_older_than(std::mem::take(&mut self.buffer), self.tolerance_seconds, now);
        self.buffer = retained;

        if removed > 0 {
            log::debug!("removed {} points older than {}s", removed, self.tolerance_seconds);
            METRICS.points_purged.fetch_add(removed, Ordering::Relaxed);
        }
        if self.buffer.is_empty() {
            return Vec::new();
        }

        log::debug!(
            "{} points, latest at {}",
            self.buffer.len(),
            filters::latest_timestamp(&self.buffer)
        );

        let mut medians = filters::median(&self.buffer);
        for point in &mut medians {
            point.time = now;
        }
        medians
    }

    /// Consumes trades until the queue closes, evaluating on every tick.
    pub async fn run(mut self, mut trades_rx: mpsc::Receiver<Trade>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                maybe = trades_rx.recv() => match maybe {
                    Some(trade) => self.ingest(trade),
                    None => {
                        log::warn!("trade queue closed, processor stops");
                        return;
                    }
                },
                _ = ticker.tick() => self.flush(Utc::now()).await,
            }
        }
    }

    async fn flush(&mut self, now: DateTime<Utc>) {
        if !self.pending_trades.is_empty() {
            let block = TradesBlock::new(std::mem::take(&mut self.pending_trades), self.node.clone());
            if let Err(e) = self.sink.set_trades_block(&block).await {
                log::error!("write trades block: {}", e);
            }
        }

        let medians = self.evaluate(now);
        if medians.is_empty() {
            return;
        }

        METRICS.medians_emitted.fetch_add(medians.len(), Ordering::Relaxed);
        if let Err(e) = self.sink.set_filter_points(&medians).await {
            log::error!("write median points: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Exchange, MEDIAN_FILTER, Pair, fixtures::*};
    use crate::sink::Datastore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySink {
        trades: Mutex<Vec<Trade>>,
        points: Mutex<Vec<FilterPoint>>,
    }

    #[async_trait]
    impl Datastore for MemorySink {
        async fn set_exchange(&self, _exchange: &Exchange) -> anyhow::Result<()> {
            Ok(())
        }

        async fn set_trade(&self, trade: &Trade) -> anyhow::Result<()> {
            self.trades.lock().unwrap().push(trade.clone());
            Ok(())
        }

        async fn set_filter_points(&self, points: &[FilterPoint]) -> anyhow::Result<()> {
            self.points.lock().unwrap().extend_from_slice(points);
            Ok(())
        }
    }

    fn node() -> ScraperId {
        ScraperId {
            id: "node-1".into(),
            name: "test".into(),
            registration_time: DateTime::default(),
        }
    }

    fn trade(quote: crate::models::Asset, price: f64, secs: i64) -> Trade {
        Trade {
            quote_token: quote,
            base_token: usdc(),
            price,
            volume: 1.0,
            time: DateTime::from_timestamp(secs, 0).unwrap(),
            exchange: Exchange {
                name: "binance".into(),
                centralized: true,
                blockchain: String::new(),
            },
            pool_address: String::new(),
            foreign_trade_id: String::new(),
            estimated_usd_price: 0.0,
        }
    }

    fn processor(sink: Arc<MemorySink>) -> Processor {
        let config = ProcessorConfig {
            tolerance_seconds: 20,
            interval_secs: 10,
        };
        Processor::new(&config, node(), sink)
    }

    #[test]
    fn evaluate_purges_then_aggregates() {
        let mut p = processor(Arc::new(MemorySink::default()));
        p.ingest(trade(eth(), 3143.3, 1000));
        p.ingest(trade(eth(), 3281.11, 1015));
        p.ingest(trade(btc(), 62344.9, 1016));
        p.ingest(trade(eth(), 3179.78, 1018));
        p.ingest(trade(eth(), 9999.0, 970));

        let now = DateTime::from_timestamp(1020, 0).unwrap();
        let medians = p.evaluate(now);

        assert_eq!(medians.len(), 2);
        assert_eq!(
            medians[0].pair,
            Pair {
                quote_token: eth(),
                base_token: usdc()
            }
        );
        assert_eq!(medians[0].value, 3179.78);
        assert_eq!(medians[0].name, MEDIAN_FILTER);
        assert_eq!(medians[0].time, now);
        assert_eq!(medians[1].value, 62344.9);

        // originals stay buffered until they age out
        assert_eq!(p.buffer.len(), 4);
        let later = DateTime::from_timestamp(1100, 0).unwrap();
        assert!(p.evaluate(later).is_empty());
        assert!(p.buffer.is_empty());
    }

    #[tokio::test]
    async fn flush_hands_trades_and_medians_to_sink() {
        let sink = Arc::new(MemorySink::default());
        let mut p = processor(sink.clone());
        p.ingest(trade(eth(), 10.0, 1000));
        p.ingest(trade(eth(), 20.0, 1001));

        p.flush(DateTime::from_timestamp(1002, 0).unwrap()).await;

        assert_eq!(sink.trades.lock().unwrap().len(), 2);
        let points = sink.points.lock().unwrap().clone();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 15.0);
        assert!(p.pending_trades.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_evaluates_on_every_tick_without_new_trades() {
        let sink = Arc::new(MemorySink::default());
        let config = ProcessorConfig {
            tolerance_seconds: 60,
            interval_secs: 1,
        };
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(Processor::new(&config, node(), sink.clone()).run(rx));

        let mut fresh = trade(eth(), 3179.78, 0);
        fresh.time = Utc::now();
        tx.send(fresh).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;

        let points = sink.points.lock().unwrap().clone();
        assert_eq!(points.len(), 2, "one median per tick");
        assert!(points.iter().all(|p| p.value == 3179.78));
        assert_eq!(sink.trades.lock().unwrap().len(), 1, "trades are written once");

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn run_stops_when_queue_closes() {
        let sink = Arc::new(MemorySink::default());
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(processor(sink).run(rx));

        tx.send(trade(btc(), 1.0, 0)).await.unwrap();
        drop(tx);

        handle.await.unwrap();
    }
}
