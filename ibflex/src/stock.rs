// ibflex/src/stock.rs
// Per-symbol aggregation over transactions and open positions.

use crate::flex_data::OpenPosition;
use crate::transaction::{Transaction, TransactionKind};
use chrono::NaiveDate;
use std::collections::BTreeMap;

const DAYS_PER_YEAR: f64 = 365.0;
/// Lot holding periods use the Julian year.
const DAYS_PER_LOT_YEAR: f64 = 365.25;

/// Aggregates for one stock symbol built from its stock and option transactions.
#[derive(Debug, Clone)]
pub struct StockLedger {
  pub symbol: String,
  pub transactions: Vec<Transaction>,
}

impl StockLedger {
  pub fn new(symbol: impl Into<String>, transactions: Vec<Transaction>) -> Self {
    Self { symbol: symbol.into(), transactions }
  }

  fn of_kind(&self, kind: TransactionKind) -> impl Iterator<Item = &Transaction> {
    self.transactions.iter().filter(move |t| t.kind == kind)
  }

  fn bought_quantity(&self) -> f64 {
    self.of_kind(TransactionKind::Buy).map(|t| t.quantity).sum()
  }

  /// Shares held: bought minus sold.
  pub fn shares(&self) -> f64 {
    self.bought_quantity() - self.of_kind(TransactionKind::Sell).map(|t| t.quantity).sum::<f64>()
  }

  /// Average purchase cost per share, `None` when nothing was bought.
  pub fn cost_basis_per_share(&self) -> Option<f64> {
    let bought = self.bought_quantity();
    if bought <= 0.0 {
      return None;
    }
    let spent: f64 = self.of_kind(TransactionKind::Buy).map(|t| t.amount).sum();
    Some(-spent / bought)
  }

  pub fn dividends(&self) -> f64 {
    self.of_kind(TransactionKind::Dividend).map(|t| t.amount).sum()
  }

  /// Net cash from every option transaction written on this symbol.
  pub fn premiums(&self) -> f64 {
    self
      .transactions
      .iter()
      .filter(|t| t.symbol.starts_with('-') && t.underlying() == self.symbol)
      .map(|t| t.amount)
      .sum()
  }

  pub fn fees(&self) -> f64 {
    self.transactions.iter().map(|t| t.fee).sum()
  }

  /// Share-weighted age of the purchases in 365-day years.
  pub fn average_age_years(&self, now: NaiveDate) -> Option<f64> {
    let (weighted_days, shares) = self
      .of_kind(TransactionKind::Buy)
      .fold((0.0, 0.0), |(days, shares), t| (days + (now - t.date).num_days() as f64 * t.quantity, shares + t.quantity));
    if shares <= 0.0 {
      return None;
    }
    Some(weighted_days / shares / DAYS_PER_YEAR)
  }

  /// Most recent covered call written on this symbol.
  pub fn last_call(&self) -> Option<&Transaction> {
    self
      .of_kind(TransactionKind::WriteCall)
      .filter(|t| t.underlying() == self.symbol)
      .max_by_key(|t| t.date)
  }

  pub fn unrealized_pnl(&self, price: f64) -> Option<f64> {
    let cost = self.cost_basis_per_share()?;
    let shares = self.shares();
    Some(price * shares - cost * shares)
  }

  /// CAGR of the position over its average age, counting dividends and
  /// option premiums as income. Amounts are already net of commissions.
  ///
  /// Returns 0 when the position has no age yet or no cost.
  pub fn annualized_return(&self, price: f64, now: NaiveDate) -> Option<f64> {
    let cost = self.cost_basis_per_share()? * self.shares();
    let years = self.average_age_years(now)?;
    if years <= 0.0 || cost <= 0.0 {
      return Some(0.0);
    }
    let value = price * self.shares() + self.dividends() + self.premiums();
    if value <= 0.0 {
      return Some(-1.0);
    }
    Some((value / cost).powf(1.0 / years) - 1.0)
  }
}

/// Gain of one open lot, as fractions (0.25 is 25%).
#[derive(Debug, Clone, PartialEq)]
pub struct LotReturn {
  pub symbol: String,
  pub open_date: Option<NaiveDate>,
  pub quantity: f64,
  pub total_gain: f64,
  pub annualized: f64,
}

pub fn lot_return(position: &OpenPosition, today: NaiveDate) -> LotReturn {
  let cost = position.cost_basis_price * position.position;
  let value = position.mark_price * position.position;
  let years = position.open_date.map_or(0.0, |d| (today - d).num_days() as f64 / DAYS_PER_LOT_YEAR);
  let total_gain = if cost != 0.0 { value / cost - 1.0 } else { 0.0 };
  let annualized = if years > 0.0 && cost > 0.0 { (value / cost).powf(1.0 / years) - 1.0 } else { 0.0 };
  LotReturn { symbol: position.symbol.clone(), open_date: position.open_date, quantity: position.position, total_gain, annualized }
}

/// Lot returns grouped by symbol, symbols in order.
pub fn lot_returns<'a, I>(positions: I, today: NaiveDate) -> BTreeMap<String, Vec<LotReturn>>
where
  I: IntoIterator<Item = &'a OpenPosition>,
{
  let mut grouped: BTreeMap<String, Vec<LotReturn>> = BTreeMap::new();
  for p in positions {
    grouped.entry(p.symbol.clone()).or_default().push(lot_return(p, today));
  }
  grouped
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionReturn {
  pub symbol: String,
  pub quantity: f64,
  pub cost: f64,
  pub price: f64,
  /// Percent.
  pub return_pct: f64,
}

pub fn position_return(position: &OpenPosition) -> PositionReturn {
  let return_pct = if position.cost_basis_price != 0.0 {
    (position.mark_price / position.cost_basis_price - 1.0) * 100.0
  } else {
    0.0
  };
  PositionReturn {
    symbol: position.symbol.clone(),
    quantity: position.position,
    cost: position.cost_basis_price,
    price: position.mark_price,
    return_pct,
  }
}

/// Long positions ranked by return, highest first, and the short option
/// positions (quantity below one) set aside.
pub fn rank_positions<'a, I>(positions: I) -> (Vec<PositionReturn>, Vec<OpenPosition>)
where
  I: IntoIterator<Item = &'a OpenPosition>,
{
  let mut longs = Vec::new();
  let mut short_calls = Vec::new();
  for p in positions {
    if p.position < 1.0 {
      short_calls.push(p.clone());
    } else {
      longs.push(position_return(p));
    }
  }
  longs.sort_by(|a, b| b.return_pct.total_cmp(&a.return_pct));
  (longs, short_calls)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
  }

  fn trx(date: NaiveDate, symbol: &str, action: &str, qty: f64, amount: f64, fee: f64) -> Transaction {
    Transaction::new(date, symbol, action, "", qty, 0.0, amount, fee)
  }

  fn aapl_ledger() -> StockLedger {
    StockLedger::new(
      "AAPL",
      vec![
        trx(d(2023, 1, 1), "AAPL", "YOU BOUGHT APPLE INC", 100.0, -15_000.0, 0.0),
        trx(d(2024, 1, 1), "AAPL", "YOU BOUGHT APPLE INC", 100.0, -19_000.0, 0.0),
        trx(d(2024, 6, 1), "AAPL", "YOU SOLD APPLE INC", 50.0, 10_000.0, 0.0),
        trx(d(2024, 3, 1), "AAPL", "DIVIDEND RECEIVED APPLE INC", 0.0, 48.0, 0.0),
        trx(d(2024, 2, 1), "-AAPL240315C200", "YOU SOLD OPENING TRANSACTION CALL (AAPL)", 1.0, 250.0, 0.65),
        trx(d(2024, 4, 1), "-AAPL240517C210", "YOU SOLD OPENING TRANSACTION CALL (AAPL)", 1.0, 300.0, 0.65),
        trx(d(2024, 4, 15), "-AAPL240517C210", "YOU BOUGHT CLOSING TRANSACTION CALL (AAPL)", 1.0, -100.0, 0.65),
        // Different underlying with a shared prefix.
        trx(d(2024, 4, 1), "-AAPLX240517C10", "YOU SOLD OPENING TRANSACTION CALL (AAPLX)", 1.0, 999.0, 0.0),
      ],
    )
  }

  #[test]
  fn test_share_and_cash_aggregates() {
    let l = aapl_ledger();
    assert_eq!(l.shares(), 150.0);
    assert_eq!(l.cost_basis_per_share(), Some(170.0));
    assert_eq!(l.dividends(), 48.0);
    assert_eq!(l.premiums(), 450.0);
    assert!((l.fees() - 1.95).abs() < 1e-9);
    assert_eq!(l.last_call().map(|t| t.date), Some(d(2024, 4, 1)));
  }

  #[test]
  fn test_empty_ledger() {
    let l = StockLedger::new("MSFT", Vec::new());
    assert_eq!(l.shares(), 0.0);
    assert_eq!(l.cost_basis_per_share(), None);
    assert_eq!(l.average_age_years(d(2025, 1, 1)), None);
    assert!(l.last_call().is_none());
    assert_eq!(l.unrealized_pnl(100.0), None);
    assert_eq!(l.annualized_return(100.0, d(2025, 1, 1)), None);
  }

  #[test]
  fn test_average_age_is_share_weighted() {
    let l = StockLedger::new(
      "KO",
      vec![
        trx(d(2023, 1, 1), "KO", "YOU BOUGHT COCA COLA", 300.0, -18_000.0, 0.0),
        trx(d(2024, 1, 1), "KO", "YOU BOUGHT COCA COLA", 100.0, -6_000.0, 0.0),
      ],
    );
    let now = d(2025, 1, 1);
    // 731 days on 300 shares, 366 days on 100 shares.
    let expected = (731.0 * 300.0 + 366.0 * 100.0) / 400.0 / 365.0;
    assert!((l.average_age_years(now).unwrap() - expected).abs() < 1e-12);
  }

  #[test]
  fn test_unrealized_and_annualized() {
    let l = StockLedger::new("KO", vec![trx(d(2023, 1, 1), "KO", "YOU BOUGHT COCA COLA", 100.0, -5_000.0, 0.0)]);
    assert_eq!(l.unrealized_pnl(60.0), Some(1_000.0));
    // Exactly two 365-day years.
    let now = d(2023, 1, 1) + chrono::Duration::days(730);
    let r = l.annualized_return(60.5, now).unwrap();
    assert!((r - 0.1).abs() < 1e-9, "{}", r);
    assert_eq!(l.annualized_return(60.0, d(2023, 1, 1)), Some(0.0));
  }

  fn open(symbol: &str, qty: f64, cost: f64, mark: f64, opened: Option<NaiveDate>) -> OpenPosition {
    OpenPosition {
      asset_category: "STK".into(),
      symbol: symbol.into(),
      position: qty,
      mark_price: mark,
      cost_basis_price: cost,
      cost_basis_money: cost * qty,
      open_date: opened,
      ..Default::default()
    }
  }

  #[test]
  fn test_lot_return_cagr() {
    let today = d(2025, 1, 1);
    let opened = today - chrono::Duration::days(1461); // 4 Julian years
    let lot = lot_return(&open("NVDA", 5.0, 400.0, 1_600.0, Some(opened)), today);
    assert!((lot.total_gain - 3.0).abs() < 1e-12);
    assert!((lot.annualized - (4f64.powf(0.25) - 1.0)).abs() < 1e-12);

    let fresh = lot_return(&open("NVDA", 5.0, 400.0, 500.0, Some(today)), today);
    assert_eq!(fresh.annualized, 0.0);
    let undated = lot_return(&open("NVDA", 5.0, 400.0, 500.0, None), today);
    assert_eq!(undated.annualized, 0.0);
    let free = lot_return(&open("NVDA", 5.0, 0.0, 500.0, Some(opened)), today);
    assert_eq!(free.annualized, 0.0);
    assert_eq!(free.total_gain, 0.0);
  }

  #[test]
  fn test_lot_returns_grouped_by_symbol() {
    let today = d(2025, 6, 1);
    let positions = vec![
      open("NVDA", 5.0, 400.0, 1200.0, Some(d(2024, 1, 1))),
      open("AAPL", 10.0, 150.0, 230.0, Some(d(2023, 1, 1))),
      open("AAPL", 10.0, 210.0, 230.0, Some(d(2025, 5, 1))),
    ];
    let grouped = lot_returns(&positions, today);
    assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["AAPL", "NVDA"]);
    assert_eq!(grouped["AAPL"].len(), 2);
  }

  #[test]
  fn test_rank_positions() {
    let positions = vec![
      open("KO", 100.0, 60.0, 66.0, None),
      open("NVDA", 10.0, 100.0, 150.0, None),
      open("AAPL  260618C00200000", -1.0, 3.0, 2.0, None),
      open("T", 50.0, 20.0, 18.0, None),
    ];
    let (longs, shorts) = rank_positions(&positions);
    let order: Vec<&str> = longs.iter().map(|p| p.symbol.as_str()).collect();
    assert_eq!(order, vec!["NVDA", "KO", "T"]);
    assert!((longs[0].return_pct - 50.0).abs() < 1e-9);
    assert!((longs[2].return_pct + 10.0).abs() < 1e-9);
    assert_eq!(shorts.len(), 1);
  }
}
