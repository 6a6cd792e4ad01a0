// ibflex/src/conn_mock.rs

use crate::base::FlexError;
use crate::conn::{redact_url, Transport, Url};
use crate::conn_log::{OUTCOME_HTTP, OUTCOME_OK, OUTCOME_TRANSPORT};

use parking_lot::Mutex;
use rusqlite::{params, Connection as DbConnection};
use std::path::Path;

#[derive(Debug, Clone)]
struct LoggedExchange {
  url: String,
  outcome: String,
  http_status: Option<u16>,
  body: String,
}

impl LoggedExchange {
  fn to_result(&self) -> Result<String, FlexError> {
    match self.outcome.as_str() {
      OUTCOME_OK => Ok(self.body.clone()),
      OUTCOME_HTTP => Err(FlexError::HttpStatus { status: self.http_status.unwrap_or(0), body: self.body.clone() }),
      OUTCOME_TRANSPORT => Err(FlexError::TransportError(self.body.clone())),
      other => Err(FlexError::ReplayError(format!("Unknown outcome '{}' in log", other))),
    }
  }
}

/// Serves responses from a session recorded by `ExchangeLogger`.
///
/// Each call consumes the next unconsumed exchange whose (redacted) URL matches
/// the request, so repeated polls of the same URL replay in recorded order.
pub struct ReplayTransport {
  exchanges: Vec<LoggedExchange>,
  consumed: Mutex<Vec<bool>>,
}

impl ReplayTransport {
  pub fn new<P: AsRef<Path>>(db_path: P, session_name: &str) -> Result<Self, FlexError> {
    log::info!("Creating ReplayTransport for session '{}' from DB: {:?}", session_name, db_path.as_ref());
    let db = DbConnection::open(db_path)
      .map_err(|e| FlexError::ConfigurationError(format!("Replay: Failed to open logger DB: {}", e)))?;

    let session_id: i64 = db
      .query_row("SELECT session_id FROM sessions WHERE session_name = ?1", params![session_name], |row| row.get(0))
      .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
          FlexError::ConfigurationError(format!("Replay: Log session '{}' not found in database.", session_name))
        }
        _ => FlexError::ReplayError(format!("Replay: Failed to query session '{}': {}", session_name, e)),
      })?;

    let mut stmt = db
      .prepare("SELECT url, outcome, http_status, body FROM exchanges WHERE session_id = ?1 ORDER BY exchange_id ASC")
      .map_err(|e| FlexError::ReplayError(format!("Replay: Failed to prepare exchange query: {}", e)))?;
    let exchanges = stmt
      .query_map(params![session_id], |row| {
        Ok(LoggedExchange { url: row.get(0)?, outcome: row.get(1)?, http_status: row.get(2)?, body: row.get(3)? })
      })
      .map_err(|e| FlexError::ReplayError(format!("Replay: Failed to query exchanges: {}", e)))?
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| FlexError::ReplayError(format!("Replay: Failed to read exchange row: {}", e)))?;

    log::info!("Loaded {} exchanges for session '{}'", exchanges.len(), session_name);
    let consumed = Mutex::new(vec![false; exchanges.len()]);
    Ok(Self { exchanges, consumed })
  }

  /// Exchanges not yet served.
  pub fn remaining(&self) -> usize {
    self.consumed.lock().iter().filter(|c| !**c).count()
  }
}

impl Transport for ReplayTransport {
  fn get(&self, url: &Url) -> Result<String, FlexError> {
    let wanted = redact_url(url);
    let mut consumed = self.consumed.lock();
    let idx = self
      .exchanges
      .iter()
      .enumerate()
      .position(|(i, ex)| !consumed[i] && ex.url == wanted)
      .ok_or_else(|| FlexError::ReplayError(format!("No recorded exchange left for {}", wanted)))?;
    consumed[idx] = true;
    log::debug!("Replaying exchange #{} for {}", idx, wanted);
    self.exchanges[idx].to_result()
  }
}
