// cqgbridge/src/lib.rs
// Main entry point for the bridge library

//! # cqgbridge
//!
//! Bridges a CQG-style WebSocket/protobuf market-data backend to simple JSON
//! push feeds:
//!
//! - Logon handshake, symbol resolution, subscriptions and time-bar requests
//!   over one persistent connection, with a dedicated reader thread routing
//!   responses by request id
//! - Per-session OHLC/volume aggregation and depth-of-market snapshots
//! - Historical lookback windows ("2 months of hourly bars")
//! - Frame logging to SQLite and replay through a scripted connection

mod base;
mod data;
mod protocol_encoder;
mod message_parser;
mod parser_client;
mod parser_data_ref;
mod parser_data_market;
mod conn_log;
mod conn_mock;
#[cfg(test)]
mod test_support;
pub mod protocol;
pub mod config;
pub mod contract;
pub mod historical_range;
pub mod handler;
pub mod conn;
pub mod client;
pub mod session_manager;
pub mod data_ref_manager;
pub mod data_market_manager;
pub mod aggregator;
pub mod persistence;
pub mod relay;

pub use base::BridgeError;
pub use client::BridgeClient;
pub use config::{BridgeConfig, Credentials};
pub use conn_log::{ConnectionLogger, LogDirection};
pub use conn_mock::{MockConnection, MockMessage};
pub use data::{
  Correction, DomPriceLevel, DomSide, DomSnapshot, HistoricalReport, MarketValuesSnapshot, PushBatch,
  PushMessage, QuoteType, TimeBar, Trade,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
