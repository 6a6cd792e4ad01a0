// ibflex/src/flex_data.rs
// Data structures for the Flex Web Service report workflow

use chrono::NaiveDate;
use std::fmt;

/// A report request: which pre-configured Flex query to run, with which token.
/// Built once per run and passed to every step of the workflow.
#[derive(Clone, PartialEq, Eq)]
pub struct ReportRequest {
  pub query_id: String,
  pub token: String,
}

impl ReportRequest {
  pub fn new(query_id: impl Into<String>, token: impl Into<String>) -> Self {
    Self { query_id: query_id.into(), token: token.into() }
  }
}

// Never print the token.
impl fmt::Debug for ReportRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ReportRequest")
      .field("query_id", &self.query_id)
      .field("token", &"<redacted>")
      .finish()
  }
}

/// `<Status>` of a `FlexStatementResponse` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStatus {
  Success,
  Warn,
  Fail,
}

impl EnvelopeStatus {
  pub fn parse(s: &str) -> Option<Self> {
    match s.trim() {
      "Success" => Some(EnvelopeStatus::Success),
      "Warn" => Some(EnvelopeStatus::Warn),
      "Fail" => Some(EnvelopeStatus::Fail),
      _ => None,
    }
  }
}

/// Parsed `FlexStatementResponse` envelope, returned by `SendRequest` and by
/// `GetStatement` while a statement is not available.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportHandle {
  pub status: EnvelopeStatus,
  pub reference_code: Option<String>,
  /// Fetch URL suggested by the service.
  pub url: Option<String>,
  pub error_code: Option<String>,
  pub error_message: Option<String>,
}

/// Raw statement XML as returned by `GetStatement`.
#[derive(Clone, PartialEq, Eq)]
pub struct ReportPayload(pub Vec<u8>);

impl ReportPayload {
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

impl fmt::Debug for ReportPayload {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ReportPayload({} bytes)", self.0.len())
  }
}

/// States of the request/poll/fetch workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
  Idle,
  Requested,
  Pending,
  Fetching,
  Ready,
  Exhausted,
}

/// Outcome of a complete retrieval.
#[derive(Debug, Clone)]
pub struct Retrieval {
  pub reference_code: String,
  pub payload: ReportPayload,
  /// Number of `GetStatement` calls issued.
  pub attempts: u32,
  pub states: Vec<WorkflowState>,
}

/// Decoded `FlexQueryResponse`.
#[derive(Debug, Clone, Default)]
pub struct FlexQueryResponse {
  pub query_name: Option<String>,
  pub statements: Vec<FlexStatement>,
}

impl FlexQueryResponse {
  pub fn trades(&self) -> impl Iterator<Item = &FlexTrade> {
    self.statements.iter().flat_map(|s| s.trades.iter())
  }

  pub fn open_positions(&self) -> impl Iterator<Item = &OpenPosition> {
    self.statements.iter().flat_map(|s| s.open_positions.iter())
  }

  pub fn cash_transactions(&self) -> impl Iterator<Item = &CashTransaction> {
    self.statements.iter().flat_map(|s| s.cash_transactions.iter())
  }
}

#[derive(Debug, Clone, Default)]
pub struct FlexStatement {
  pub account_id: Option<String>,
  pub from_date: Option<NaiveDate>,
  pub to_date: Option<NaiveDate>,
  pub when_generated: Option<String>,
  pub trades: Vec<FlexTrade>,
  pub open_positions: Vec<OpenPosition>,
  pub cash_transactions: Vec<CashTransaction>,
}

/// One `<Trade>` row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlexTrade {
  pub asset_category: String,
  pub symbol: String,
  pub underlying_symbol: Option<String>,
  pub description: String,
  pub conid: Option<i64>,
  pub currency: Option<String>,
  /// "BUY" / "SELL"
  pub buy_sell: String,
  /// "O" (opening) / "C" (closing)
  pub open_close: Option<String>,
  pub quantity: f64,
  pub trade_price: f64,
  pub cost: f64,
  pub commission: f64,
  pub trade_date: Option<NaiveDate>,
  pub trade_id: Option<String>,
  pub put_call: Option<String>,
  pub strike: Option<f64>,
  pub expiry: Option<NaiveDate>,
}

impl FlexTrade {
  pub fn is_stock(&self) -> bool {
    self.asset_category == "STK"
  }
}

/// One `<OpenPosition>` row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenPosition {
  pub asset_category: String,
  pub symbol: String,
  pub underlying_symbol: Option<String>,
  pub position: f64,
  pub mark_price: f64,
  pub cost_basis_price: f64,
  pub cost_basis_money: f64,
  pub open_date: Option<NaiveDate>,
}

/// One `<CashTransaction>` row (dividends, withholding, fees).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CashTransaction {
  /// `transactionID`, stable across statements.
  pub transaction_id: Option<String>,
  pub kind: String,
  pub symbol: String,
  pub description: String,
  pub amount: f64,
  pub date: Option<NaiveDate>,
}
