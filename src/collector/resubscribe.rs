//! Per-pair staleness detection and resubscription.
//!
//! Exchanges that multiplex many pair channels over one socket can
//! lose a single channel while the connection stays healthy. Instead of
//! tearing the connection down, a stale pair is queued and the worker
//! replays `unsubscribe` -> delay -> `subscribe` for it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::Sink;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, interval_at, sleep};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::{
    collector::connection::ControlWriter,
    exchanges::adapter::{ExchangeAdapter, SubscribeAction},
    metrics::METRICS,
    models::{ExchangePair, Pair},
};

/// Last trade receipt per subscribed pair.
#[derive(Default)]
pub struct PairActivity {
    seen: RwLock<HashMap<Pair, Instant>>,
}

impl PairActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touch(&self, pair: &Pair) {
        if let Ok(mut seen) = self.seen.write() {
            seen.insert(pair.clone(), Instant::now());
        }
    }

    /// Time since the pair's last trade; `None` if never touched.
    pub fn silence(&self, pair: &Pair) -> Option<Duration> {
        let seen = self.seen.read().ok()?;
        seen.get(pair).map(|t| t.elapsed())
    }
}

/// Watches one pair and queues it for resubscription when it has been
/// silent for longer than `delay`.
pub async fn run_pair_watchdog(
    pair: ExchangePair,
    delay: Duration,
    activity: Arc<PairActivity>,
    resubscribe_tx: mpsc::Sender<ExchangePair>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + delay, delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let silence = activity
                    .silence(&pair.underlying_pair)
                    .unwrap_or(Duration::MAX);
                if silence > delay {
                    log::warn!("{} silent for {:?}, queue resubscription", pair.foreign_name, silence);
                    if resubscribe_tx.send(pair.clone()).await.is_err() {
                        return;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// Drains the resubscription queue until shutdown.
///
/// Shutdown is only observed while waiting for the next pair; a started
/// unsubscribe/subscribe sequence always runs to the end.
pub async fn run_resubscriber<W>(
    adapter: Arc<dyn ExchangeAdapter>,
    writer: Arc<ControlWriter<W>>,
    activity: Arc<PairActivity>,
    mut queue: mpsc::Receiver<ExchangePair>,
    delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    W: Sink<Message, Error = WsError> + Unpin + Send,
{
    loop {
        let pair = tokio::select! {
            next = queue.recv() => match next {
                Some(pair) => pair,
                None => return,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    log::info!("{} - resubscriber stopped", adapter.name());
                    return;
                }
                continue;
            }
        };

        send_control(adapter.as_ref(), &writer, SubscribeAction::Unsubscribe, &pair).await;
        sleep(delay).await;
        send_control(adapter.as_ref(), &writer, SubscribeAction::Subscribe, &pair).await;

        // fresh subscription gets a full window
        activity.touch(&pair.underlying_pair);
        METRICS.resubscriptions.fetch_add(1, Ordering::Relaxed);
    }
}

/// Sends one control frame, logging the outcome.
pub async fn send_control<W>(
    adapter: &dyn ExchangeAdapter,
    writer: &ControlWriter<W>,
    action: SubscribeAction,
    pair: &ExchangePair,
) -> bool
where
    W: Sink<Message, Error = WsError> + Unpin + Send,
{
    let Some(frame) = adapter.build_subscribe_message(action, pair) else {
        return false;
    };
    if writer.is_closed() {
        log::debug!("{} - socket closed, skip {} {}", adapter.name(), action.method(), pair.foreign_name);
        return false;
    }

    match writer.send_json(&frame).await {
        Ok(()) => {
            log::info!("{} - {} {}", adapter.name(), action.method(), pair.foreign_name);
            true
        }
        Err(e) => {
            log::error!("{} - {} {}: {}", adapter.name(), action.method(), pair.foreign_name, e);
            false
        }
    }
}
