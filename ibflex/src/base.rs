// ibflex/src/base.rs
// Base types and error definitions for the Flex and Client Portal clients

use once_cell::sync::Lazy;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur while talking to IBKR or working with local data.
#[derive(Error, Debug, Clone)]
pub enum FlexError {
  #[error("Configuration error: {0}")]
  ConfigurationError(String),

  #[error("Transport error: {0}")]
  TransportError(String),

  #[error("HTTP status {status}: {body}")]
  HttpStatus { status: u16, body: String },

  #[error("IBKR Error {code}: {message}")]
  RemoteError { code: String, message: String },

  #[error("Decode error: {0}")]
  DecodeError(String),

  #[error("Not ready: {0}")]
  NotReady(String),

  #[error("Gave up after {attempts} attempts: {last}")]
  RetriesExhausted { attempts: u32, last: Box<FlexError> },

  #[error("Cancelled")]
  Cancelled,

  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),

  #[error("Store error: {0}")]
  StoreError(String),

  #[error("Logging error: {0}")]
  LoggingError(String),

  #[error("Replay error: {0}")]
  ReplayError(String),
}

impl FlexError {
  /// Whether retrying the same call later could succeed.
  ///
  /// Remote errors are judged by their Flex error code; unknown codes are
  /// treated as permanent so that bad tokens and query ids surface at once.
  pub fn is_transient(&self) -> bool {
    match self {
      FlexError::TransportError(_) | FlexError::NotReady(_) => true,
      FlexError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
      FlexError::RemoteError { code, .. } => flex_error_code(code).map_or(false, |c| c.retryable),
      _ => false,
    }
  }

  /// Catch-all predicate, retries every failure the same way.
  pub fn always(_: &FlexError) -> bool {
    true
  }

  /// Remote error code, if this is an error reported by IBKR itself.
  pub fn remote_code(&self) -> Option<&str> {
    match self {
      FlexError::RemoteError { code, .. } => Some(code.as_str()).filter(|c| !c.is_empty()),
      FlexError::RetriesExhausted { last, .. } => last.remote_code(),
      _ => None,
    }
  }
}

/// Known Flex Web Service error codes.
#[derive(Debug, Clone, Copy)]
pub struct FlexErrorCode {
  pub description: &'static str,
  pub retryable: bool,
}

static FLEX_ERROR_CODES: Lazy<HashMap<&'static str, FlexErrorCode>> = Lazy::new(|| {
  let mut m = HashMap::new();
  let mut add = |code: &'static str, description: &'static str, retryable: bool| {
    m.insert(code, FlexErrorCode { description, retryable });
  };
  add("1001", "Statement could not be generated at this time", true);
  add("1003", "Statement is not available", false);
  add("1004", "Statement is incomplete at this time", true);
  add("1005", "Settlement data is not ready at this time", true);
  add("1006", "FIFO P/L data is not ready at this time", true);
  add("1007", "MTM P/L data is not ready at this time", true);
  add("1008", "MTM and FIFO P/L data is not ready at this time", true);
  add("1009", "The server is under heavy load", true);
  add("1010", "Legacy Flex Queries are no longer supported", false);
  add("1011", "Service account is inactive", false);
  add("1012", "Token has expired", false);
  add("1013", "IP restriction", false);
  add("1014", "Query is invalid", false);
  add("1015", "Token is invalid", false);
  add("1016", "Account is invalid", false);
  add("1017", "Reference code is invalid", false);
  add("1018", "Too many requests have been made from this token", true);
  add("1019", "Statement generation in progress", true);
  add("1020", "Invalid request or unable to validate request", false);
  add("1021", "Statement could not be retrieved at this time", true);
  m
});

/// Look up a Flex error code (e.g. "1019").
pub fn flex_error_code(code: &str) -> Option<FlexErrorCode> {
  FLEX_ERROR_CODES.get(code.trim()).copied()
}
