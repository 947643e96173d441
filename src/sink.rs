//! Output stage of the processor.
//!
//! Persistence to a ledger or database is not part of this crate; the
//! processor only talks to the [`Datastore`] trait. [`LogSink`] is the
//! built-in implementation and writes everything to the log.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Exchange, FilterPoint, Trade, TradesBlock};

#[async_trait]
pub trait Datastore: Send + Sync {
    async fn set_exchange(&self, exchange: &Exchange) -> Result<()>;

    async fn set_trade(&self, trade: &Trade) -> Result<()>;

    /// Writes a block of trades. Defaults to one `set_trade` per trade.
    async fn set_trades_block(&self, block: &TradesBlock) -> Result<()> {
        for trade in &block.trades {
            self.set_trade(trade).await?;
        }
        Ok(())
    }

    /// Writes the aggregated points of one evaluation.
    async fn set_filter_points(&self, points: &[FilterPoint]) -> Result<()>;
}

pub struct LogSink;

#[async_trait]
impl Datastore for LogSink {
    async fn set_exchange(&self, exchange: &Exchange) -> Result<()> {
        log::info!(
            "register exchange {} (centralized={}, blockchain='{}')",
            exchange.name,
            exchange.centralized,
            exchange.blockchain
        );
        Ok(())
    }

    async fn set_trade(&self, trade: &Trade) -> Result<()> {
        log::trace!(
            "trade {} {}-{} price={} volume={} at {}",
            trade.exchange.name,
            trade.quote_token.symbol,
            trade.base_token.symbol,
            trade.price,
            trade.volume,
            trade.time
        );
        Ok(())
    }

    async fn set_trades_block(&self, block: &TradesBlock) -> Result<()> {
        log::debug!(
            "{} trades from {} between {} and {}",
            block.trades.len(),
            block.scraper_id.id,
            block.start_time,
            block.end_time
        );
        for trade in &block.trades {
            self.set_trade(trade).await?;
        }
        Ok(())
    }

    async fn set_filter_points(&self, points: &[FilterPoint]) -> Result<()> {
        for p in points {
            log::info!("{} {} = {} at {}", p.name, p.pair, p.value, p.time);
        }
        Ok(())
    }
}
