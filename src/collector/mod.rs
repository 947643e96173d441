/// Collector module
///
/// This module groups all logic responsible for:
/// - Running one scraper per exchange (connection, read loop)
/// - Liveness watchdogs and per-pair resubscription
/// - Restarting failed scrapers
///
/// Design notes:
/// - Exchange-specific logic MUST NOT live here
/// - Scrapers report failures, only the dispatcher restarts them
pub mod connection;
pub mod dispatcher;
pub mod resubscribe;
pub mod runner;
pub mod watchdog;
