use futures_util::{Sink, Stream, StreamExt};
use std::sync::{Arc, atomic::Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};

use crate::{
    collector::{
        connection::ControlWriter,
        resubscribe::{PairActivity, run_pair_watchdog, run_resubscriber, send_control},
        watchdog::{Liveness, run_watchdog},
    },
    config::ScraperConfig,
    error::{FailureReason, Failover},
    exchanges::adapter::{ExchangeAdapter, ParseResult, SubscribeAction},
    metrics::METRICS,
    models::{ExchangePair, TickerPairMap, Trade, make_ticker_pair_map},
    util,
};

/// Everything one scraper instance needs.
///
/// A scraper owns exactly one socket for its lifetime. It never retries
/// in place: every terminal condition ends in a single `Failover` on
/// `failover_tx`, and the dispatcher starts a replacement.
#[derive(Clone)]
pub struct ScraperContext {
    pub adapter: Arc<dyn ExchangeAdapter>,
    pub pairs: Vec<ExchangePair>,
    pub settings: ScraperConfig,
    pub instance: u64,
    pub trades_tx: mpsc::Sender<Trade>,
    pub failover_tx: mpsc::Sender<Failover>,
}

/// Runs one scraper instance to completion.
///
/// This function:
/// - Connects to the exchange endpoint
/// - Hands the socket to `serve_connection`
/// - Reports a connect failure once and exits
///
pub async fn run_scraper(ctx: ScraperContext) {
    let name = ctx.adapter.name();
    let url = ctx.adapter.ws_url(&ctx.pairs);
    log::info!("{} - starting scraper #{} with {} pairs", name, ctx.instance, ctx.pairs.len());

    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            log::error!("{} - connect to {}: {}", name, url, e);
            report(&ctx, FailureReason::Connect(e.to_string())).await;
            return;
        }
    };

    METRICS.ws_connections_active.fetch_add(1, Ordering::Relaxed);
    let (write, read) = ws.split();
    serve_connection(&ctx, read, Arc::new(ControlWriter::new(write))).await;
    METRICS.ws_connections_active.fetch_sub(1, Ordering::Relaxed);
}

/// Drives an established connection until it fails, then tears it down
/// and reports exactly one failure.
///
/// Teardown order:
/// 1. auxiliary tasks are cancelled and joined
/// 2. the socket is closed
/// 3. (read error budget only) the restart wait elapses
/// 4. the failure is posted
pub(crate) async fn serve_connection<R, W>(
    ctx: &ScraperContext,
    read: R,
    writer: Arc<ControlWriter<W>>,
) where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
    W: Sink<Message, Error = WsError> + Unpin + Send + 'static,
{
    let reason = run_session(ctx, read, writer.clone()).await;

    writer.close().await;
    report(ctx, reason).await;
}

/// Posts the failure, after the restart wait for failures that would
/// otherwise turn into a tight reconnect loop.
async fn report(ctx: &ScraperContext, reason: FailureReason) {
    if matches!(reason, FailureReason::ReadErrors(_) | FailureReason::Connect(_)) {
        log::warn!(
            "{} - wait {:?} before reporting failure",
            ctx.adapter.name(),
            ctx.settings.restart_wait()
        );
        sleep(ctx.settings.restart_wait()).await;
    }

    log::warn!("{} - scraper #{} stopped: {}", ctx.adapter.name(), ctx.instance, reason);
    METRICS.failovers.fetch_add(1, Ordering::Relaxed);

    let failover = Failover {
        exchange: ctx.adapter.name().to_string(),
        instance: ctx.instance,
        reason,
    };
    if ctx.failover_tx.send(failover).await.is_err() {
        log::error!("{} - failover queue closed", ctx.adapter.name());
    }
}

/// Subscribes, spawns the watchdogs, and reads until a terminal
/// condition. Auxiliary tasks are joined before returning.
async fn run_session<R, W>(
    ctx: &ScraperContext,
    mut read: R,
    writer: Arc<ControlWriter<W>>,
) -> FailureReason
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
    W: Sink<Message, Error = WsError> + Unpin + Send + 'static,
{
    let adapter = ctx.adapter.clone();
    let tickers = make_ticker_pair_map(&ctx.pairs);
    let liveness = Arc::new(Liveness::new());
    let activity = Arc::new(PairActivity::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // --------------------------------------------------
    // Channel subscriptions
    // --------------------------------------------------
    if adapter.channel_subscriptions() {
        let subscribed = subscribe_pairs(adapter.as_ref(), &writer, &ctx.pairs, &activity).await;
        log::info!("{} - subscribed {}/{} pairs", adapter.name(), subscribed, ctx.pairs.len());

        let (resub_tx, resub_rx) = mpsc::channel::<ExchangePair>(ctx.pairs.len().max(1));

        for pair in &ctx.pairs {
            let delay = ctx
                .settings
                .pair_watchdog_delay(adapter.name(), pair, util::env_lookup);
            tasks.push(tokio::spawn(run_pair_watchdog(
                pair.clone(),
                delay,
                activity.clone(),
                resub_tx.clone(),
                shutdown_rx.clone(),
            )));
        }

        tasks.push(tokio::spawn(run_resubscriber(
            adapter.clone(),
            writer.clone(),
            activity.clone(),
            resub_rx,
            ctx.settings.resubscribe_delay(),
            shutdown_rx.clone(),
        )));
    }

    // --------------------------------------------------
    // Connection watchdog
    // --------------------------------------------------
    let (expired_tx, mut expired_rx) = oneshot::channel();
    tasks.push(tokio::spawn({
        let liveness = liveness.clone();
        let delay = ctx.settings.watchdog_delay();
        let shutdown = shutdown_rx.clone();
        async move {
            if let Some(silence) = run_watchdog(&liveness, delay, shutdown).await {
                let _ = expired_tx.send(silence);
            }
        }
    }));

    // --------------------------------------------------
    // Read loop
    // --------------------------------------------------
    let mut err_count: u32 = 0;
    let mut watchdog_armed = true;

    let reason = loop {
        tokio::select! {
            expired = &mut expired_rx, if watchdog_armed => match expired {
                Ok(silence) => {
                    log::error!("{} - watchdog failover after {:?} without trades", adapter.name(), silence);
                    break FailureReason::WatchdogExpired(silence);
                }
                Err(_) => watchdog_armed = false,
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    err_count = 0;
                    if let Some(reason) = handle_text(ctx, &text, &tickers, &liveness, &activity).await {
                        break reason;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    log::warn!("{} - close frame: {:?}", adapter.name(), frame);
                    break FailureReason::StreamClosed;
                }
                // ping / pong / binary
                Some(Ok(_)) => err_count = 0,
                Some(Err(e)) => {
                    err_count += 1;
                    METRICS.read_errors.fetch_add(1, Ordering::Relaxed);
                    log::error!("{} - read message ({}/{}): {}", adapter.name(), err_count, ctx.settings.max_err_count, e);
                    if err_count > ctx.settings.max_err_count {
                        break FailureReason::ReadErrors(err_count);
                    }
                }
                None => break FailureReason::StreamClosed,
            }
        }
    };

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }

    reason
}

/// Sends the initial subscription for every pair.
///
/// A pair's watchdog window starts only once its subscribe frame was
/// written; pairs that failed stay unseen and are resubscribed on the
/// first watchdog tick. Returns the number of pairs subscribed.
async fn subscribe_pairs<W>(
    adapter: &dyn ExchangeAdapter,
    writer: &ControlWriter<W>,
    pairs: &[ExchangePair],
    activity: &PairActivity,
) -> usize
where
    W: Sink<Message, Error = WsError> + Unpin + Send,
{
    let mut subscribed = 0;
    for pair in pairs {
        if send_control(adapter, writer, SubscribeAction::Subscribe, pair).await {
            activity.touch(&pair.underlying_pair);
            subscribed += 1;
        }
    }
    subscribed
}

/// Decodes one text frame and forwards its trades.
///
/// Returns a failure reason only when the trade queue is closed.
async fn handle_text(
    ctx: &ScraperContext,
    text: &str,
    tickers: &TickerPairMap,
    liveness: &Liveness,
    activity: &PairActivity,
) -> Option<FailureReason> {
    match ctx.adapter.parse_message(text, tickers) {
        ParseResult::Trades(trades) => {
            for trade in trades {
                METRICS.trades_received.fetch_add(1, Ordering::Relaxed);
                liveness.touch();
                activity.touch(&trade.pair());

                // Bounded queue: waiting here is the backpressure point.
                if ctx.trades_tx.send(trade).await.is_err() {
                    return Some(FailureReason::TradesQueueClosed);
                }
                METRICS.trades_forwarded.fetch_add(1, Ordering::Relaxed);
            }
        }
        ParseResult::Control => {}
        ParseResult::Error(e) => {
            METRICS.parse_errors.fetch_add(1, Ordering::Relaxed);
            log::debug!("{} - drop message: {}", ctx.adapter.name(), e);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::connection::testing::recording_sink;
    use crate::exchanges::{binance::BinanceAdapter, kraken_v2::KrakenV2Adapter};
    use crate::models::fixtures::*;
    use futures_util::stream;
    use std::time::Duration;
    use tokio::time::{Instant, timeout};

    const BTC_TRADE: &str = r#"{"e":"trade","s":"BTCUSDT","t":7,"p":"62344.9","q":"1.5","T":1721643612000,"m":true}"#;

    struct Harness {
        ctx: ScraperContext,
        trades_rx: mpsc::Receiver<Trade>,
        failover_rx: mpsc::Receiver<Failover>,
    }

    fn harness(adapter: Arc<dyn ExchangeAdapter>, settings: ScraperConfig) -> Harness {
        let (trades_tx, trades_rx) = mpsc::channel(16);
        let (failover_tx, failover_rx) = mpsc::channel(16);

        Harness {
            ctx: ScraperContext {
                adapter,
                pairs: vec![exchange_pair(btc(), usdt(), "BTC-USDT")],
                settings,
                instance: 1,
                trades_tx,
                failover_tx,
            },
            trades_rx,
            failover_rx,
        }
    }

    fn text(raw: &str) -> Result<Message, WsError> {
        Ok(Message::Text(raw.to_string().into()))
    }

    fn read_error() -> Result<Message, WsError> {
        Err(WsError::Io(std::io::Error::other("reset")))
    }

    #[tokio::test(start_paused = true)]
    async fn silent_feed_reports_exactly_one_failure() {
        let mut h = harness(Arc::new(BinanceAdapter), ScraperConfig::default());
        let (sink, _frames) = recording_sink();
        let writer = Arc::new(ControlWriter::new(sink));

        serve_connection(&h.ctx, stream::pending(), writer.clone()).await;

        let failover = h.failover_rx.try_recv().unwrap();
        assert_eq!(failover.exchange, "binance");
        assert_eq!(failover.instance, 1);
        assert!(matches!(failover.reason, FailureReason::WatchdogExpired(_)));
        assert!(h.failover_rx.try_recv().is_err());
        assert!(writer.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn trade_before_expiry_keeps_feed_alive() {
        let mut h = harness(Arc::new(BinanceAdapter), ScraperConfig::default());
        let (sink, _frames) = recording_sink();
        let writer = Arc::new(ControlWriter::new(sink));

        let late_trade = Box::pin(
            stream::once(async {
                sleep(Duration::from_secs(59)).await;
                text(BTC_TRADE)
            })
            .chain(stream::pending()),
        );

        let ctx = h.ctx.clone();
        tokio::spawn(async move { serve_connection(&ctx, late_trade, writer).await });

        let trade = h.trades_rx.recv().await.unwrap();
        assert_eq!(trade.price, 62344.9);
        assert_eq!(trade.quote_token, btc());

        // the first check at 60s sees one second of silence
        let waited = timeout(Duration::from_secs(50), h.failover_rx.recv()).await;
        assert!(waited.is_err(), "no failover expected yet");
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_messages_are_dropped() {
        let mut h = harness(Arc::new(BinanceAdapter), ScraperConfig::default());
        let (sink, _frames) = recording_sink();
        let writer = Arc::new(ControlWriter::new(sink));

        let feed = stream::iter(vec![text("garbage"), text(BTC_TRADE), text("{}")]);
        serve_connection(&h.ctx, feed, writer).await;

        assert_eq!(h.trades_rx.try_recv().unwrap().foreign_trade_id, "7");
        assert!(h.trades_rx.try_recv().is_err());
        assert_eq!(h.failover_rx.try_recv().unwrap().reason, FailureReason::StreamClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn read_error_budget_forces_restart() {
        let settings = ScraperConfig {
            max_err_count: 3,
            ..ScraperConfig::default()
        };
        let mut h = harness(Arc::new(BinanceAdapter), settings);
        let (sink, _frames) = recording_sink();
        let writer = Arc::new(ControlWriter::new(sink));

        let feed = stream::iter((0..4).map(|_| read_error())).chain(stream::pending());
        let started = Instant::now();
        serve_connection(&h.ctx, feed, writer).await;

        assert_eq!(h.failover_rx.try_recv().unwrap().reason, FailureReason::ReadErrors(4));
        assert!(started.elapsed() >= Duration::from_secs(5), "restart wait elapsed");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_waits_before_reporting() {
        let mut h = harness(Arc::new(BinanceAdapter), ScraperConfig::default());

        let started = Instant::now();
        report(&h.ctx, FailureReason::Connect("refused".into())).await;

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(matches!(h.failover_rx.try_recv().unwrap().reason, FailureReason::Connect(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_read_resets_error_budget() {
        let settings = ScraperConfig {
            max_err_count: 3,
            ..ScraperConfig::default()
        };
        let mut h = harness(Arc::new(BinanceAdapter), settings);
        let (sink, _frames) = recording_sink();
        let writer = Arc::new(ControlWriter::new(sink));

        let mut frames: Vec<Result<Message, WsError>> = (0..3).map(|_| read_error()).collect();
        frames.push(Ok(Message::Ping(Default::default())));
        frames.extend((0..3).map(|_| read_error()));
        let feed = stream::iter(frames).chain(stream::pending());

        serve_connection(&h.ctx, feed, writer).await;

        let failover = h.failover_rx.try_recv().unwrap();
        assert!(matches!(failover.reason, FailureReason::WatchdogExpired(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn channel_exchange_subscribes_each_pair() {
        let mut h = harness(Arc::new(KrakenV2Adapter), ScraperConfig::default());
        h.ctx.pairs.push(exchange_pair(eth(), usdt(), "ETH-USDT"));
        let (sink, mut frames) = recording_sink();
        let writer = Arc::new(ControlWriter::new(sink));

        serve_connection(&h.ctx, stream::empty(), writer).await;

        let mut subscribed = Vec::new();
        while let Ok(Message::Text(t)) = frames.try_recv() {
            let v: serde_json::Value = serde_json::from_str(t.as_str()).unwrap();
            assert_eq!(v["method"], "subscribe");
            subscribed.push(v["params"]["symbol"][0].as_str().unwrap().to_string());
        }
        assert_eq!(subscribed, vec!["BTC/USDT", "ETH/USDT"]);
        assert_eq!(h.failover_rx.try_recv().unwrap().reason, FailureReason::StreamClosed);
    }

    #[tokio::test]
    async fn only_written_subscriptions_start_the_pair_clock() {
        let pairs = vec![exchange_pair(btc(), usdt(), "BTC-USDT")];
        let (sink, _frames) = recording_sink();
        let writer = ControlWriter::new(sink);

        let activity = PairActivity::new();
        writer.close().await;
        assert_eq!(subscribe_pairs(&KrakenV2Adapter, &writer, &pairs, &activity).await, 0);
        assert!(activity.silence(&pairs[0].underlying_pair).is_none());

        let (sink, mut frames) = recording_sink();
        let writer = ControlWriter::new(sink);
        assert_eq!(subscribe_pairs(&KrakenV2Adapter, &writer, &pairs, &activity).await, 1);
        assert!(activity.silence(&pairs[0].underlying_pair).is_some());
        assert!(frames.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_trade_queue_stops_scraper() {
        let mut h = harness(Arc::new(BinanceAdapter), ScraperConfig::default());
        let (sink, _frames) = recording_sink();
        let writer = Arc::new(ControlWriter::new(sink));
        drop(h.trades_rx);

        serve_connection(&h.ctx, stream::iter(vec![text(BTC_TRADE)]).chain(stream::pending()), writer).await;

        assert_eq!(h.failover_rx.try_recv().unwrap().reason, FailureReason::TradesQueueClosed);
    }
}
