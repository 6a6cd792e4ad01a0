// ibflex/src/conn_log.rs

use crate::base::FlexError;
use crate::conn::{redact_url, Transport, Url};

use parking_lot::Mutex;
use rusqlite::{params, Connection as DbConnection};
use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

// Outcome labels stored in the `outcome` column.
pub(crate) const OUTCOME_OK: &str = "OK";
pub(crate) const OUTCOME_HTTP: &str = "HTTP";
pub(crate) const OUTCOME_TRANSPORT: &str = "TRANSPORT";

struct ExchangeLoggerInner {
  db: DbConnection,
  session_id: i64,
  start_time_instant: Instant,
}

/// Records GET/response exchanges into a SQLite session so a run can be
/// replayed later by `ReplayTransport`. Tokens are redacted before storage.
#[derive(Clone)]
pub struct ExchangeLogger {
  inner: Arc<Mutex<ExchangeLoggerInner>>,
}

impl ExchangeLogger {
  /// Opens (or creates) the database, deletes any previous session with the
  /// same name, and starts a new session record.
  pub fn new<P: AsRef<Path>>(db_path: P, session_name: &str) -> Result<Self, FlexError> {
    log::info!("Initializing exchange logger at path: {:?}, Session Name: '{}'", db_path.as_ref(), session_name);
    let mut db = DbConnection::open(db_path)
      .map_err(|e| FlexError::ConfigurationError(format!("Failed to open logger database: {}", e)))?;
    db.execute("PRAGMA foreign_keys = ON;", [])
      .map_err(|e| FlexError::ConfigurationError(format!("Failed to enable foreign keys: {}", e)))?;

    Self::create_tables(&db)?;

    let start_time_unix_ms = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map_err(|e| FlexError::LoggingError(format!("System time error: {}", e)))?
      .as_millis() as i64;
    let session_id = Self::delete_and_insert_session(&mut db, session_name, start_time_unix_ms)?;
    log::info!("Started logger session ID: {} for name '{}'", session_id, session_name);

    Ok(Self {
      inner: Arc::new(Mutex::new(ExchangeLoggerInner { db, session_id, start_time_instant: Instant::now() })),
    })
  }

  pub(crate) fn create_tables(db: &DbConnection) -> Result<(), FlexError> {
    db.execute_batch(
      "BEGIN;
       CREATE TABLE IF NOT EXISTS sessions (
           session_id          INTEGER PRIMARY KEY AUTOINCREMENT,
           session_name        TEXT NOT NULL UNIQUE,
           start_time_unix_ms  INTEGER NOT NULL
       );
       CREATE TABLE IF NOT EXISTS exchanges (
           exchange_id           INTEGER PRIMARY KEY AUTOINCREMENT,
           session_id            INTEGER NOT NULL,
           relative_timestamp_ms REAL NOT NULL,
           url                   TEXT NOT NULL,
           outcome               TEXT NOT NULL CHECK(outcome IN ('OK', 'HTTP', 'TRANSPORT')),
           http_status           INTEGER NULL,
           body                  TEXT NOT NULL,
           FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
       );
       CREATE INDEX IF NOT EXISTS idx_sessions_name ON sessions (session_name);
       CREATE INDEX IF NOT EXISTS idx_exchanges_session ON exchanges (session_id, exchange_id);
       COMMIT;",
    )
    .map_err(|e| FlexError::ConfigurationError(format!("Failed to create logger tables: {}", e)))?;
    Ok(())
  }

  fn delete_and_insert_session(db: &mut DbConnection, session_name: &str, start_time_unix_ms: i64) -> Result<i64, FlexError> {
    let tx = db.transaction()
      .map_err(|e| FlexError::LoggingError(format!("Failed to start logger transaction: {}", e)))?;

    let deleted_count = tx.execute("DELETE FROM sessions WHERE session_name = ?1", params![session_name])
      .map_err(|e| FlexError::LoggingError(format!("Failed to delete previous session '{}': {}", session_name, e)))?;
    if deleted_count > 0 {
      log::warn!("Deleted {} previous log session(s) named '{}'", deleted_count, session_name);
    }

    tx.execute(
      "INSERT INTO sessions (session_name, start_time_unix_ms) VALUES (?1, ?2)",
      params![session_name, start_time_unix_ms],
    )
    .map_err(|e| FlexError::LoggingError(format!("Failed to insert new session '{}': {}", session_name, e)))?;
    let new_session_id = tx.last_insert_rowid();

    tx.commit()
      .map_err(|e| FlexError::LoggingError(format!("Failed to commit logger transaction: {}", e)))?;
    Ok(new_session_id)
  }

  /// Logs one exchange. Failures to write are logged, never propagated.
  pub fn log_exchange(&self, url: &Url, result: &Result<String, FlexError>) {
    let (outcome, http_status, body): (&str, Option<u16>, String) = match result {
      Ok(body) => (OUTCOME_OK, None, body.clone()),
      Err(FlexError::HttpStatus { status, body }) => (OUTCOME_HTTP, Some(*status), body.clone()),
      Err(e) => (OUTCOME_TRANSPORT, None, e.to_string()),
    };
    let shown = redact_url(url);

    let guard = self.inner.lock();
    let relative_ms = guard.start_time_instant.elapsed().as_secs_f64() * 1000.0;
    match guard.db.execute(
      "INSERT INTO exchanges (session_id, relative_timestamp_ms, url, outcome, http_status, body)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![guard.session_id, relative_ms, shown, outcome, http_status, body],
    ) {
      Ok(_) => log::trace!("Logged exchange: {} {} RelTime={:.3}ms Size={}", outcome, shown, relative_ms, body.len()),
      Err(e) => log::error!("Failed to log exchange to database: {}", e),
    }
  }
}

/// Transport wrapper that records every exchange of the inner transport.
pub struct LoggingTransport<T: Transport> {
  inner: T,
  logger: ExchangeLogger,
}

impl<T: Transport> LoggingTransport<T> {
  pub fn new(inner: T, logger: ExchangeLogger) -> Self {
    Self { inner, logger }
  }
}

impl<T: Transport> Transport for LoggingTransport<T> {
  fn get(&self, url: &Url) -> Result<String, FlexError> {
    let result = self.inner.get(url);
    self.logger.log_exchange(url, &result);
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::conn::MockTransport;

  #[test]
  fn test_records_exchanges_with_redacted_token() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("exchanges.db");
    let logger = ExchangeLogger::new(&db_path, "unit").unwrap();

    let mut mock = MockTransport::new();
    let mut seq = mockall::Sequence::new();
    mock.expect_get().times(1).in_sequence(&mut seq).returning(|_| Ok("<ok/>".to_string()));
    mock.expect_get().times(1).in_sequence(&mut seq)
      .returning(|_| Err(FlexError::HttpStatus { status: 503, body: "Server error".into() }));
    let transport = LoggingTransport::new(mock, logger);

    let url = Url::parse("https://example.com/SendRequest?t=TOPSECRET&q=1&v=3").unwrap();
    assert!(transport.get(&url).is_ok());
    assert!(transport.get(&url).is_err());

    let db = DbConnection::open(&db_path).unwrap();
    let rows: Vec<(String, String, Option<u16>)> = db
      .prepare("SELECT url, outcome, http_status FROM exchanges ORDER BY exchange_id")
      .unwrap()
      .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
      .unwrap()
      .collect::<Result<_, _>>()
      .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(!rows[0].0.contains("TOPSECRET"));
    assert_eq!(rows[0].1, OUTCOME_OK);
    assert_eq!(rows[1].1, OUTCOME_HTTP);
    assert_eq!(rows[1].2, Some(503));
  }

  #[test]
  fn test_same_session_name_replaces_previous() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("exchanges.db");
    let url = Url::parse("https://example.com/x").unwrap();
    ExchangeLogger::new(&db_path, "s").unwrap().log_exchange(&url, &Ok("a".into()));
    ExchangeLogger::new(&db_path, "s").unwrap().log_exchange(&url, &Ok("b".into()));

    let db = DbConnection::open(&db_path).unwrap();
    let bodies: Vec<String> = db
      .prepare("SELECT body FROM exchanges").unwrap()
      .query_map([], |r| r.get(0)).unwrap()
      .collect::<Result<_, _>>().unwrap();
    assert_eq!(bodies, vec!["b".to_string()]);
  }
}
