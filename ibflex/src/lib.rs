// ibflex/src/lib.rs
// Main entry point for the ibflex library

//! # ibflex - Interactive Brokers statements and positions
//!
//! Blocking clients for the Interactive Brokers Flex Web Service and the
//! Client Portal Gateway, plus a local transaction ledger:
//!
//! - Flex report retrieval (request, poll, fetch) under an injected retry policy
//! - Statement decoding into trades, open positions and cash transactions
//! - Per-symbol cost basis, income and return metrics
//! - Exchange logging and replay for offline runs

mod base;
pub mod config;
pub mod conn;
pub mod conn_log;
pub mod conn_mock;
pub mod flex_client;
pub mod flex_data;
pub mod parser_flex;
pub mod portal;
pub mod printer;
pub mod retry;
pub mod stock;
pub mod store;
pub mod transaction;

pub use base::{flex_error_code, FlexError, FlexErrorCode};
pub use config::FlexConfig;
pub use flex_client::{FlexClient, FlexSettings};
pub use flex_data::ReportRequest;
pub use parser_flex::{parse_envelope, parse_statement};
pub use portal::PortalClient;
pub use retry::{CancelToken, DelayStrategy, RetryPolicy};
pub use store::TransactionStore;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
