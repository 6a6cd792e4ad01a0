// ibflex/src/store.rs
// SQLite-backed transaction store.

use crate::base::FlexError;
use crate::flex_data::FlexQueryResponse;
use crate::stock::StockLedger;
use crate::transaction::{OptionSymbol, Transaction, TransactionKind};

use chrono::NaiveDate;
use log::{debug, info, warn};
use rusqlite::{params, Connection as DbConnection, Row};
use std::path::Path;

const DATE_FORMAT: &str = "%Y-%m-%d";

const INSERT_SQL: &str = "INSERT OR IGNORE INTO transactions
  (external_id, date, symbol, action, description, quantity, price, amount, fee, kind)
  VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

/// Outcome of [`TransactionStore::import_statement`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
  pub inserted: usize,
  /// Rows already present from an earlier import.
  pub duplicates: usize,
  /// Rows that could not be turned into transactions (e.g. no date).
  pub skipped: usize,
}

fn store_err(context: &str) -> impl Fn(rusqlite::Error) -> FlexError + '_ {
  move |e| FlexError::StoreError(format!("{}: {}", context, e))
}

/// Local store of brokerage transactions. Rows carry their kind as decided
/// at ingestion.
pub struct TransactionStore {
  db: DbConnection,
}

impl TransactionStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FlexError> {
    debug!("Opening transaction store at {:?}", path.as_ref());
    let db = DbConnection::open(path).map_err(store_err("Failed to open transaction store"))?;
    Self::with_connection(db)
  }

  pub fn open_in_memory() -> Result<Self, FlexError> {
    let db = DbConnection::open_in_memory().map_err(store_err("Failed to open in-memory store"))?;
    Self::with_connection(db)
  }

  fn with_connection(db: DbConnection) -> Result<Self, FlexError> {
    db.execute_batch(
      "CREATE TABLE IF NOT EXISTS transactions (
           id           INTEGER PRIMARY KEY AUTOINCREMENT,
           date         TEXT NOT NULL,
           symbol       TEXT NOT NULL,
           action       TEXT NOT NULL,
           description  TEXT NOT NULL,
           quantity     REAL NOT NULL,
           price        REAL NOT NULL,
           amount       REAL NOT NULL,
           fee          REAL NOT NULL,
           kind         TEXT NOT NULL,
           external_id  TEXT
       );
       CREATE INDEX IF NOT EXISTS idx_transactions_symbol ON transactions (symbol);",
    )
    .map_err(store_err("Failed to create transactions table"))?;

    // Stores created before source ids were tracked lack the column.
    let has_external_id = db
      .prepare("SELECT 1 FROM pragma_table_info('transactions') WHERE name = 'external_id'")
      .and_then(|mut stmt| stmt.exists([]))
      .map_err(store_err("Failed to inspect transactions table"))?;
    if !has_external_id {
      debug!("Adding external_id column to transactions table");
      db.execute_batch("ALTER TABLE transactions ADD COLUMN external_id TEXT;")
        .map_err(store_err("Failed to add external_id column"))?;
    }
    db.execute_batch("CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_external_id ON transactions (external_id);")
      .map_err(store_err("Failed to create external_id index"))?;
    Ok(Self { db })
  }

  /// Insert one transaction. Returns its row id, or `None` when a row with
  /// the same `external_id` is already stored.
  pub fn insert(&self, t: &Transaction) -> Result<Option<i64>, FlexError> {
    let changed = self
      .db
      .execute(INSERT_SQL, params![
        t.external_id,
        t.date.format(DATE_FORMAT).to_string(),
        t.symbol,
        t.action,
        t.description,
        t.quantity,
        t.price,
        t.amount,
        t.fee,
        t.kind.as_str()
      ])
      .map_err(store_err("Failed to insert transaction"))?;
    Ok((changed > 0).then(|| self.db.last_insert_rowid()))
  }

  /// Insert all transactions in a single SQL transaction. Returns the number
  /// of rows actually added; rows whose `external_id` is already stored are
  /// ignored.
  pub fn insert_all(&mut self, transactions: &[Transaction]) -> Result<usize, FlexError> {
    let tx = self.db.transaction().map_err(store_err("Failed to begin store transaction"))?;
    let mut inserted = 0;
    {
      let mut stmt = tx.prepare(INSERT_SQL).map_err(store_err("Failed to prepare insert"))?;
      for t in transactions {
        inserted += stmt
          .execute(params![
            t.external_id,
            t.date.format(DATE_FORMAT).to_string(),
            t.symbol,
            t.action,
            t.description,
            t.quantity,
            t.price,
            t.amount,
            t.fee,
            t.kind.as_str()
          ])
          .map_err(store_err("Failed to insert transaction"))?;
      }
    }
    tx.commit().map_err(store_err("Failed to commit transactions"))?;
    info!("Stored {} of {} transactions", inserted, transactions.len());
    Ok(inserted)
  }

  /// Store the trades and cash transactions of a decoded statement.
  ///
  /// Rows already imported from an earlier statement are counted as
  /// duplicates; rows that can't be converted are logged and skipped.
  pub fn import_statement(&mut self, statement: &FlexQueryResponse) -> Result<ImportSummary, FlexError> {
    let mut transactions = Vec::new();
    let mut skipped = 0;
    for trade in statement.trades() {
      match Transaction::from_flex_trade(trade) {
        Ok(t) => transactions.push(t),
        Err(e) => {
          warn!("Skipping trade: {}", e);
          skipped += 1;
        }
      }
    }
    for cash in statement.cash_transactions() {
      match Transaction::from_cash_transaction(cash) {
        Ok(t) => transactions.push(t),
        Err(e) => {
          warn!("Skipping cash transaction: {}", e);
          skipped += 1;
        }
      }
    }
    let inserted = self.insert_all(&transactions)?;
    Ok(ImportSummary { inserted, duplicates: transactions.len() - inserted, skipped })
  }

  /// Distinct stock symbols, options folded into their underlying.
  pub fn symbols(&self) -> Result<Vec<String>, FlexError> {
    let mut stmt = self.db.prepare("SELECT DISTINCT symbol FROM transactions").map_err(store_err("Failed to prepare symbol query"))?;
    let raw = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(store_err("Failed to query symbols"))?
      .collect::<Result<Vec<_>, _>>()
      .map_err(store_err("Failed to read symbol row"))?;

    let mut symbols: Vec<String> = raw
      .iter()
      .map(|s| OptionSymbol::parse(s).map_or_else(|| s.trim_start_matches('-').to_string(), |o| o.underlying))
      .filter(|s| !s.is_empty())
      .collect();
    symbols.sort();
    symbols.dedup();
    Ok(symbols)
  }

  /// Transactions on `symbol` and on its options (`-SYMBOL...`), oldest first.
  pub fn transactions_for(&self, symbol: &str) -> Result<Vec<Transaction>, FlexError> {
    let mut stmt = self
      .db
      .prepare(
        "SELECT id, external_id, date, symbol, action, description, quantity, price, amount, fee, kind
         FROM transactions
         WHERE symbol = ?1 OR symbol LIKE '-' || ?1 || '%'
         ORDER BY date ASC, id ASC",
      )
      .map_err(store_err("Failed to prepare transaction query"))?;
    let rows = stmt
      .query_map(params![symbol], Self::row_to_parts)
      .map_err(store_err("Failed to query transactions"))?
      .collect::<Result<Vec<_>, _>>()
      .map_err(store_err("Failed to read transaction row"))?;
    rows.into_iter().map(StoredRow::into_transaction).collect()
  }

  /// Ledger of `symbol`. Options on other underlyings that share the prefix
  /// (e.g. `-AAPLX...` for `AAPL`) are excluded.
  pub fn ledger(&self, symbol: &str) -> Result<StockLedger, FlexError> {
    let transactions = self
      .transactions_for(symbol)?
      .into_iter()
      .filter(|t| t.symbol == symbol || t.underlying() == symbol)
      .collect();
    Ok(StockLedger::new(symbol, transactions))
  }

  pub fn count(&self) -> Result<usize, FlexError> {
    let n: i64 = self
      .db
      .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))
      .map_err(store_err("Failed to count transactions"))?;
    Ok(n as usize)
  }

  fn row_to_parts(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
      id: row.get(0)?,
      external_id: row.get(1)?,
      date: row.get(2)?,
      symbol: row.get(3)?,
      action: row.get(4)?,
      description: row.get(5)?,
      quantity: row.get(6)?,
      price: row.get(7)?,
      amount: row.get(8)?,
      fee: row.get(9)?,
      kind: row.get(10)?,
    })
  }
}

struct StoredRow {
  id: i64,
  external_id: Option<String>,
  date: String,
  symbol: String,
  action: String,
  description: String,
  quantity: f64,
  price: f64,
  amount: f64,
  fee: f64,
  kind: String,
}

impl StoredRow {
  fn into_transaction(self) -> Result<Transaction, FlexError> {
    let date = NaiveDate::parse_from_str(&self.date, DATE_FORMAT)
      .map_err(|e| FlexError::StoreError(format!("Bad date '{}' in row {}: {}", self.date, self.id, e)))?;
    let kind: TransactionKind = self.kind.parse()?;
    Ok(Transaction {
      id: Some(self.id),
      external_id: self.external_id,
      date,
      symbol: self.symbol,
      action: self.action,
      description: self.description,
      quantity: self.quantity,
      price: self.price,
      amount: self.amount,
      fee: self.fee,
      kind,
    })
  }
}
