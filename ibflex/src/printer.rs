// ibflex/src/printer.rs
// Plain-text tables for the command-line tool.

use crate::flex_data::{FlexTrade, OpenPosition};
use crate::portal::PortalPosition;
use crate::stock::{LotReturn, PositionReturn, StockLedger};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt::Write;

const RULE: &str = "------------------------------------------------------------";

fn date_or_dash(d: Option<NaiveDate>) -> String {
  d.map_or_else(|| "-".to_string(), |d| d.format("%Y-%m-%d").to_string())
}

pub fn format_trades(trades: &[FlexTrade]) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "{:<12} {:<5} {:<24} {:>10} {:>12}", "Date", "Side", "Symbol", "Qty", "Price");
  let _ = writeln!(out, "{}", RULE);
  for t in trades {
    let _ = writeln!(
      out,
      "{:<12} {:<5} {:<24} {:>10.2} {:>12.4}",
      date_or_dash(t.trade_date),
      t.buy_sell,
      t.symbol,
      t.quantity,
      t.trade_price
    );
  }
  out
}

/// Long positions ranked by return.
pub fn format_position_returns(rows: &[PositionReturn]) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "{:<10} {:<10} {:<12} {:<12} {}", "Symbol", "Qty", "Cost Basis", "Price", "PR");
  let _ = writeln!(out, "{}", RULE);
  for r in rows {
    let _ = writeln!(out, "{:<10} {:<10.2} {:<12.2} {:<12.2} {:<12.2}", r.symbol, r.quantity, r.cost, r.price, r.return_pct);
  }
  out
}

/// Short option positions set aside by the ranking.
pub fn format_short_positions(positions: &[OpenPosition]) -> String {
  let mut out = String::new();
  if positions.is_empty() {
    return out;
  }
  let _ = writeln!(out, "Short positions:");
  for p in positions {
    let _ = writeln!(out, "  {:<28} {:>8.0} {:>10.2} {:>10.2}", p.symbol, p.position, p.cost_basis_price, p.mark_price);
  }
  out
}

pub fn format_lot_returns(grouped: &BTreeMap<String, Vec<LotReturn>>) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "{:<8} {:<12} {:<8} {:<11} {:<12}", "Symbol", "Date", "Qty", "Total Gain", "Annualized %");
  let _ = writeln!(out, "{}", RULE);
  for (symbol, lots) in grouped {
    for lot in lots {
      let _ = writeln!(
        out,
        "{:<8} {:<12} {:<8.1} {:<11} {:<12}",
        symbol,
        date_or_dash(lot.open_date),
        lot.quantity,
        format!("{:.1}%", lot.total_gain * 100.0),
        format!("{:.2}%", lot.annualized * 100.0)
      );
    }
    out.push('\n');
  }
  out
}

/// Rows of `(symbol, price, unrealized P&L)`.
pub fn format_unrealized(rows: &[(String, f64, Option<f64>)]) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "{:<10} {:>12} {:>14}", "Symbol", "Price", "Unrealized");
  let _ = writeln!(out, "{}", RULE);
  let mut total = 0.0;
  for (symbol, price, pnl) in rows {
    match pnl {
      Some(pnl) => {
        total += pnl;
        let _ = writeln!(out, "{:<10} {:>12.2} {:>14.2}", symbol, price, pnl);
      }
      None => {
        let _ = writeln!(out, "{:<10} {:>12.2} {:>14}", symbol, price, "n/a");
      }
    }
  }
  let _ = writeln!(out, "{}", RULE);
  let _ = writeln!(out, "{:<10} {:>12} {:>14.2}", "Total", "", total);
  out
}

pub fn format_portal_positions(positions: &[PortalPosition]) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "{:<24} {:>10} {:>12} {:>14} {:>14}", "Contract", "Position", "Avg Cost", "Mkt Value", "Unrealized");
  let _ = writeln!(out, "{}", RULE);
  let mut total_value = 0.0;
  let mut total_pnl = 0.0;
  for p in positions {
    let desc = p.contract_desc.clone().unwrap_or_else(|| p.conid.to_string());
    let value = p.mkt_value.unwrap_or(0.0);
    let pnl = p.unrealized_pnl.unwrap_or(0.0);
    total_value += value;
    total_pnl += pnl;
    let _ = writeln!(out, "{:<24} {:>10.2} {:>12.2} {:>14.2} {:>14.2}", desc, p.position, p.avg_cost, value, pnl);
  }
  let _ = writeln!(out, "{}", RULE);
  let _ = writeln!(out, "{:<24} {:>10} {:>12} {:>14.2} {:>14.2}", "Total", "", "", total_value, total_pnl);
  out
}

/// Summary block for one symbol. `price` enables the P&L and return lines.
pub fn format_ledger_summary(ledger: &StockLedger, price: Option<f64>, today: NaiveDate) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "{}", ledger.symbol);
  let _ = writeln!(out, "  Shares:          {:.2}", ledger.shares());
  match ledger.cost_basis_per_share() {
    Some(cost) => {
      let _ = writeln!(out, "  Cost basis:      {:.2}", cost);
    }
    None => {
      let _ = writeln!(out, "  Cost basis:      n/a");
    }
  }
  let _ = writeln!(out, "  Dividends:       {:.2}", ledger.dividends());
  let _ = writeln!(out, "  Premiums:        {:.2}", ledger.premiums());
  let _ = writeln!(out, "  Fees:            {:.2}", ledger.fees());
  if let Some(age) = ledger.average_age_years(today) {
    let _ = writeln!(out, "  Average age:     {:.2} years", age);
  }
  if let Some(call) = ledger.last_call() {
    let expiry = call.option_symbol().map(|o| format!(" (expires {}, {:.2} years)", o.expiry, o.years_to_expiry(today)));
    let _ = writeln!(out, "  Last call:       {} on {}{}", call.symbol, call.date, expiry.unwrap_or_default());
  }
  if let Some(price) = price {
    let _ = writeln!(out, "  Price:           {:.2}", price);
    if let Some(pnl) = ledger.unrealized_pnl(price) {
      let _ = writeln!(out, "  Unrealized P&L:  {:.2}", pnl);
    }
    if let Some(r) = ledger.annualized_return(price, today) {
      let _ = writeln!(out, "  Annualized:      {:.2}%", r * 100.0);
    }
  }
  out
}
