//! Failure events reported by scrapers to the dispatcher.
//!
//! Scrapers never return errors to their caller. Every terminal
//! condition is turned into exactly one [`Failover`] on the shared
//! failure queue, and the dispatcher decides what to do with it.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureReason {
    /// The WebSocket handshake did not complete.
    #[error("connect failed: {0}")]
    Connect(String),

    /// No trade arrived within the watchdog delay.
    #[error("no trade received for {0:?}")]
    WatchdogExpired(Duration),

    /// The consecutive read error budget was exhausted.
    #[error("{0} consecutive read errors")]
    ReadErrors(u32),

    /// The exchange closed the stream.
    #[error("stream closed by exchange")]
    StreamClosed,

    /// The processor side of the trade queue is gone.
    #[error("trade queue closed")]
    TradesQueueClosed,
}

/// Failure signal for one scraper instance.
///
/// `instance` lets the dispatcher tell a live instance's report apart
/// from late duplicates sent by an instance it already replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct Failover {
    pub exchange: String,
    pub instance: u64,
    pub reason: FailureReason,
}
