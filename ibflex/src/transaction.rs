// ibflex/src/transaction.rs
// Brokerage transactions, classified once when they enter the system.

use crate::base::FlexError;
use crate::flex_data::{CashTransaction, FlexTrade};
use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;

/// What a transaction did. Decided at ingestion, never re-derived from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
  Buy,
  Sell,
  Dividend,
  /// Sold an opening call (covered call premium).
  WriteCall,
  /// Sold an opening put.
  WritePut,
  BuyToOpen,
  BuyToClose,
  SellToClose,
  Expired,
  Other,
}

impl TransactionKind {
  /// Classify a brokerage action line such as
  /// `YOU SOLD OPENING TRANSACTION CALL (AAPL) ...`.
  ///
  /// `symbol` breaks ties for opening sales that don't spell out the right:
  /// an option symbol like `-AAPL260618P150` makes it a put.
  pub fn classify(action: &str, symbol: &str) -> Self {
    let action = action.trim().to_uppercase();
    if action.starts_with("YOU SOLD OPENING TRANSACTION") {
      let rest = action["YOU SOLD OPENING TRANSACTION".len()..].trim_start();
      if rest.starts_with("CALL") {
        return TransactionKind::WriteCall;
      }
      if rest.starts_with("PUT") {
        return TransactionKind::WritePut;
      }
      return match OptionSymbol::parse(symbol).map(|o| o.right) {
        Some(OptionRight::Put) => TransactionKind::WritePut,
        Some(OptionRight::Call) => TransactionKind::WriteCall,
        None => TransactionKind::Other,
      };
    }
    if action.starts_with("YOU BOUGHT OPENING TRANSACTION") {
      TransactionKind::BuyToOpen
    } else if action.starts_with("YOU BOUGHT CLOSING TRANSACTION") {
      TransactionKind::BuyToClose
    } else if action.starts_with("YOU SOLD CLOSING TRANSACTION") {
      TransactionKind::SellToClose
    } else if action.starts_with("YOU BOUGHT") {
      TransactionKind::Buy
    } else if action.starts_with("YOU SOLD") {
      TransactionKind::Sell
    } else if action.starts_with("DIVIDEND RECEIVED") {
      TransactionKind::Dividend
    } else if action.starts_with("EXPIRED") {
      TransactionKind::Expired
    } else {
      TransactionKind::Other
    }
  }

  /// Classify a Flex `<Trade>` from its structured attributes.
  pub fn from_flex_trade(trade: &FlexTrade) -> Self {
    let buy = trade.buy_sell.trim().eq_ignore_ascii_case("BUY");
    let sell = trade.buy_sell.trim().eq_ignore_ascii_case("SELL");
    if trade.is_stock() {
      return match (buy, sell) {
        (true, _) => TransactionKind::Buy,
        (_, true) => TransactionKind::Sell,
        _ => TransactionKind::Other,
      };
    }
    if trade.asset_category != "OPT" {
      return TransactionKind::Other;
    }
    // "C;Ep" marks an expiration closing the position.
    let open_close = trade.open_close.as_deref().unwrap_or("").to_uppercase();
    if open_close.split(';').any(|p| p.trim() == "EP") {
      return TransactionKind::Expired;
    }
    let opening = open_close.starts_with('O');
    let closing = open_close.starts_with('C');
    let right = trade.put_call.as_deref().and_then(|p| p.parse::<OptionRight>().ok());
    match (buy, sell, opening, closing) {
      (_, true, true, _) => match right {
        Some(OptionRight::Put) => TransactionKind::WritePut,
        Some(OptionRight::Call) => TransactionKind::WriteCall,
        None => TransactionKind::Other,
      },
      (true, _, true, _) => TransactionKind::BuyToOpen,
      (true, _, _, true) => TransactionKind::BuyToClose,
      (_, true, _, true) => TransactionKind::SellToClose,
      _ => TransactionKind::Other,
    }
  }

  pub fn from_cash_type(kind: &str) -> Self {
    let kind = kind.trim().to_uppercase();
    if kind.starts_with("DIVIDEND") {
      TransactionKind::Dividend
    } else {
      TransactionKind::Other
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      TransactionKind::Buy => "BUY",
      TransactionKind::Sell => "SELL",
      TransactionKind::Dividend => "DIVIDEND",
      TransactionKind::WriteCall => "WRITE_CALL",
      TransactionKind::WritePut => "WRITE_PUT",
      TransactionKind::BuyToOpen => "BUY_TO_OPEN",
      TransactionKind::BuyToClose => "BUY_TO_CLOSE",
      TransactionKind::SellToClose => "SELL_TO_CLOSE",
      TransactionKind::Expired => "EXPIRED",
      TransactionKind::Other => "OTHER",
    }
  }

  /// Action text in the brokerage export convention.
  pub fn action_label(&self) -> &'static str {
    match self {
      TransactionKind::Buy => "YOU BOUGHT",
      TransactionKind::Sell => "YOU SOLD",
      TransactionKind::Dividend => "DIVIDEND RECEIVED",
      TransactionKind::WriteCall => "YOU SOLD OPENING TRANSACTION CALL",
      TransactionKind::WritePut => "YOU SOLD OPENING TRANSACTION PUT",
      TransactionKind::BuyToOpen => "YOU BOUGHT OPENING TRANSACTION",
      TransactionKind::BuyToClose => "YOU BOUGHT CLOSING TRANSACTION",
      TransactionKind::SellToClose => "YOU SOLD CLOSING TRANSACTION",
      TransactionKind::Expired => "EXPIRED",
      TransactionKind::Other => "OTHER",
    }
  }

  pub fn is_option(&self) -> bool {
    matches!(
      self,
      TransactionKind::WriteCall
        | TransactionKind::WritePut
        | TransactionKind::BuyToOpen
        | TransactionKind::BuyToClose
        | TransactionKind::SellToClose
        | TransactionKind::Expired
    )
  }
}

impl fmt::Display for TransactionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for TransactionKind {
  type Err = FlexError;
  fn from_str(s: &str) -> Result<Self, FlexError> {
    match s.trim() {
      "BUY" => Ok(TransactionKind::Buy),
      "SELL" => Ok(TransactionKind::Sell),
      "DIVIDEND" => Ok(TransactionKind::Dividend),
      "WRITE_CALL" => Ok(TransactionKind::WriteCall),
      "WRITE_PUT" => Ok(TransactionKind::WritePut),
      "BUY_TO_OPEN" => Ok(TransactionKind::BuyToOpen),
      "BUY_TO_CLOSE" => Ok(TransactionKind::BuyToClose),
      "SELL_TO_CLOSE" => Ok(TransactionKind::SellToClose),
      "EXPIRED" => Ok(TransactionKind::Expired),
      "OTHER" => Ok(TransactionKind::Other),
      _ => Err(FlexError::InvalidParameter(format!("Unknown transaction kind '{}'", s))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionRight {
  Call,
  Put,
}

impl fmt::Display for OptionRight {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OptionRight::Call => write!(f, "C"),
      OptionRight::Put => write!(f, "P"),
    }
  }
}

impl FromStr for OptionRight {
  type Err = FlexError;
  fn from_str(s: &str) -> Result<Self, FlexError> {
    match s.trim().to_uppercase().as_str() {
      "C" | "CALL" => Ok(OptionRight::Call),
      "P" | "PUT" => Ok(OptionRight::Put),
      _ => Err(FlexError::InvalidParameter(format!("Unknown option right '{}'", s))),
    }
  }
}

/// Option symbol in the `-AAPL260618C200` form: dash, underlying, `YYMMDD`
/// expiry, right, strike.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSymbol {
  pub underlying: String,
  pub expiry: NaiveDate,
  pub right: OptionRight,
  pub strike: f64,
}

impl OptionSymbol {
  pub fn parse(symbol: &str) -> Option<Self> {
    let body = symbol.trim().strip_prefix('-')?;
    let digits_at = body.find(|c: char| c.is_ascii_digit())?;
    let underlying = &body[..digits_at];
    let rest = &body[digits_at..];
    if underlying.is_empty() || rest.len() < 8 || !rest.is_char_boundary(6) {
      return None;
    }
    let (date, rest) = rest.split_at(6);
    if !date.bytes().all(|b| b.is_ascii_digit()) {
      return None;
    }
    let expiry = NaiveDate::parse_from_str(&format!("20{}", date), "%Y%m%d").ok()?;
    let mut chars = rest.chars();
    let right = match chars.next()? {
      'C' | 'c' => OptionRight::Call,
      'P' | 'p' => OptionRight::Put,
      _ => return None,
    };
    let strike: f64 = chars.as_str().parse().ok()?;
    if !strike.is_finite() || strike <= 0.0 {
      return None;
    }
    Some(OptionSymbol { underlying: underlying.to_string(), expiry, right, strike })
  }

  /// Parse an OCC-style contract symbol as found in Flex statements:
  /// root, then `YYMMDD`, right and an eight digit strike in thousandths
  /// (`AAPL  250620C00200000`).
  pub fn from_occ(symbol: &str) -> Option<Self> {
    let symbol = symbol.trim();
    if symbol.len() < 16 || !symbol.is_ascii() {
      return None;
    }
    let (root, code) = symbol.split_at(symbol.len() - 15);
    let underlying = root.trim();
    if underlying.is_empty() || underlying.contains(char::is_whitespace) {
      return None;
    }
    let (date, rest) = code.split_at(6);
    let (right, strike) = rest.split_at(1);
    if !date.bytes().chain(strike.bytes()).all(|b| b.is_ascii_digit()) {
      return None;
    }
    let expiry = NaiveDate::parse_from_str(&format!("20{}", date), "%Y%m%d").ok()?;
    let right = right.parse::<OptionRight>().ok()?;
    let strike = strike.parse::<u64>().ok()? as f64 / 1000.0;
    if strike <= 0.0 {
      return None;
    }
    Some(OptionSymbol { underlying: underlying.to_string(), expiry, right, strike })
  }

  /// Years from `today` until expiry on a 365-day year. Negative once expired.
  pub fn years_to_expiry(&self, today: NaiveDate) -> f64 {
    (self.expiry - today).num_days() as f64 / 365.0
  }
}

impl fmt::Display for OptionSymbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "-{}{}{}{}", self.underlying, self.expiry.format("%y%m%d"), self.right, self.strike)
  }
}

/// One brokerage transaction.
///
/// Amounts follow the cash-flow sign: purchases are negative, sales and
/// income are positive. `quantity` is always the unsigned share or contract count.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
  /// Store row id, `None` until inserted.
  pub id: Option<i64>,
  /// Identity at the source (`trade:<tradeID>`, `cash:<transactionID>`).
  /// Rows with the same id are stored once.
  pub external_id: Option<String>,
  pub date: NaiveDate,
  pub symbol: String,
  pub action: String,
  pub description: String,
  pub quantity: f64,
  pub price: f64,
  pub amount: f64,
  pub fee: f64,
  pub kind: TransactionKind,
}

impl Transaction {
  /// Build from a brokerage export row, classifying it from its action text.
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    date: NaiveDate,
    symbol: &str,
    action: &str,
    description: &str,
    quantity: f64,
    price: f64,
    amount: f64,
    fee: f64,
  ) -> Self {
    Self {
      id: None,
      external_id: None,
      date,
      symbol: symbol.trim().to_string(),
      action: action.trim().to_string(),
      description: description.trim().to_string(),
      quantity: quantity.abs(),
      price,
      amount,
      fee: fee.abs(),
      kind: TransactionKind::classify(action, symbol),
    }
  }

  pub fn from_flex_trade(trade: &FlexTrade) -> Result<Self, FlexError> {
    let date = trade
      .trade_date
      .ok_or_else(|| FlexError::InvalidParameter(format!("Trade {:?} for {} has no tradeDate", trade.trade_id, trade.symbol)))?;
    let kind = TransactionKind::from_flex_trade(trade);

    let symbol = if trade.asset_category == "OPT" {
      let underlying = trade
        .underlying_symbol
        .clone()
        .unwrap_or_else(|| trade.symbol.split_whitespace().next().unwrap_or("").to_string());
      let right = trade.put_call.as_deref().and_then(|p| p.parse::<OptionRight>().ok());
      match (trade.expiry, right, trade.strike) {
        (Some(expiry), Some(right), Some(strike)) => OptionSymbol { underlying, expiry, right, strike }.to_string(),
        // Keep the dash prefix so the row still folds into its underlying.
        _ => OptionSymbol::from_occ(&trade.symbol).map_or_else(|| format!("-{}", underlying), |o| o.to_string()),
      }
    } else {
      trade.symbol.clone()
    };

    let multiplier = if trade.asset_category == "OPT" { 100.0 } else { 1.0 };
    // Flex quantity is signed (negative for sells), commission is negative.
    let amount = -(trade.quantity * trade.trade_price * multiplier) + trade.commission;

    let external_id = match trade.trade_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
      Some(id) => format!("trade:{}", id),
      None => format!("trade:{}:{}:{}:{}:{}", date, symbol, trade.buy_sell.trim(), trade.quantity, trade.trade_price),
    };

    Ok(Self {
      id: None,
      external_id: Some(external_id),
      date,
      symbol,
      action: kind.action_label().to_string(),
      description: trade.description.clone(),
      quantity: trade.quantity.abs(),
      price: trade.trade_price,
      amount,
      fee: trade.commission.abs(),
      kind,
    })
  }

  pub fn from_cash_transaction(cash: &CashTransaction) -> Result<Self, FlexError> {
    let date = cash
      .date
      .ok_or_else(|| FlexError::InvalidParameter(format!("Cash transaction '{}' has no date", cash.description)))?;
    let kind = TransactionKind::from_cash_type(&cash.kind);
    let external_id = match cash.transaction_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
      Some(id) => format!("cash:{}", id),
      None => format!("cash:{}:{}:{}:{}", cash.kind.trim(), cash.symbol.trim(), date, cash.amount),
    };
    Ok(Self {
      id: None,
      external_id: Some(external_id),
      date,
      symbol: cash.symbol.clone(),
      action: if kind == TransactionKind::Other { cash.kind.to_uppercase() } else { kind.action_label().to_string() },
      description: cash.description.clone(),
      quantity: 0.0,
      price: 0.0,
      amount: cash.amount,
      fee: 0.0,
      kind,
    })
  }

  pub fn option_symbol(&self) -> Option<OptionSymbol> {
    OptionSymbol::parse(&self.symbol)
  }

  /// Stock symbol this transaction belongs to. Options map to their underlying.
  pub fn underlying(&self) -> String {
    match self.option_symbol() {
      Some(o) => o.underlying,
      None => self.symbol.trim_start_matches('-').to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
  }

  #[test]
  fn test_classify_brokerage_actions() {
    let cases = [
      ("YOU BOUGHT APPLE INC (AAPL) (Cash)", "AAPL", TransactionKind::Buy),
      ("YOU SOLD APPLE INC (AAPL) (Cash)", "AAPL", TransactionKind::Sell),
      ("DIVIDEND RECEIVED APPLE INC (AAPL) (Cash)", "AAPL", TransactionKind::Dividend),
      ("YOU SOLD OPENING TRANSACTION CALL (AAPL) APPLE INC JUN 18 26 $200", "-AAPL260618C200", TransactionKind::WriteCall),
      ("YOU SOLD OPENING TRANSACTION PUT (AAPL) APPLE INC JUN 18 26 $150", "-AAPL260618P150", TransactionKind::WritePut),
      ("YOU BOUGHT OPENING TRANSACTION CALL (AAPL)", "-AAPL260618C200", TransactionKind::BuyToOpen),
      ("YOU BOUGHT CLOSING TRANSACTION CALL (AAPL)", "-AAPL260618C200", TransactionKind::BuyToClose),
      ("YOU SOLD CLOSING TRANSACTION PUT (AAPL)", "-AAPL260618P150", TransactionKind::SellToClose),
      ("EXPIRED CALL (AAPL) APPLE INC", "-AAPL260618C200", TransactionKind::Expired),
      ("REINVESTMENT FIDELITY GOVERNMENT MONEY MARKET", "SPAXX", TransactionKind::Other),
      ("  you bought apple inc", "AAPL", TransactionKind::Buy),
    ];
    for (action, symbol, expected) in cases {
      assert_eq!(TransactionKind::classify(action, symbol), expected, "{}", action);
    }
  }

  #[test]
  fn test_opening_sale_falls_back_to_symbol_right() {
    assert_eq!(TransactionKind::classify("YOU SOLD OPENING TRANSACTION", "-MSFT260116P400"), TransactionKind::WritePut);
    assert_eq!(TransactionKind::classify("YOU SOLD OPENING TRANSACTION", "MSFT"), TransactionKind::Other);
  }

  #[test]
  fn test_kind_text_round_trip_through_store_format() {
    for kind in [TransactionKind::WriteCall, TransactionKind::Expired, TransactionKind::Other] {
      assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
    }
    assert!("bogus".parse::<TransactionKind>().is_err());
  }

  #[test]
  fn test_parse_option_symbol() {
    let o = OptionSymbol::parse("-AAPL260618C200").unwrap();
    assert_eq!(o.underlying, "AAPL");
    assert_eq!(o.expiry, d(2026, 6, 18));
    assert_eq!(o.right, OptionRight::Call);
    assert_eq!(o.strike, 200.0);

    let p = OptionSymbol::parse("-SPY251219P512.5").unwrap();
    assert_eq!(p.right, OptionRight::Put);
    assert_eq!(p.strike, 512.5);
    assert_eq!(p.to_string(), "-SPY251219P512.5");

    assert!(OptionSymbol::parse("AAPL").is_none());
    assert!(OptionSymbol::parse("-AAPL").is_none());
    assert!(OptionSymbol::parse("-AAPL261340C200").is_none());
    assert!(OptionSymbol::parse("-AAPL260618X200").is_none());
    assert!(OptionSymbol::parse("-AAPL260618C").is_none());
  }

  #[test]
  fn test_years_to_expiry() {
    let o = OptionSymbol::parse("-AAPL260618C200").unwrap();
    assert!((o.years_to_expiry(d(2025, 6, 18)) - 1.0).abs() < 1e-9);
    assert!(o.years_to_expiry(d(2026, 7, 1)) < 0.0);
  }

  #[test]
  fn test_new_transaction_is_classified_and_normalized() {
    let t = Transaction::new(d(2024, 3, 1), "-AAPL260618C200", "YOU SOLD OPENING TRANSACTION CALL (AAPL)", "APPLE", -1.0, 3.2, 319.34, -0.66);
    assert_eq!(t.kind, TransactionKind::WriteCall);
    assert_eq!(t.quantity, 1.0);
    assert_eq!(t.fee, 0.66);
    assert_eq!(t.underlying(), "AAPL");
    assert!(t.kind.is_option());
  }

  fn flex_trade(category: &str, buy_sell: &str, open_close: &str, put_call: Option<&str>) -> FlexTrade {
    FlexTrade {
      asset_category: category.into(),
      symbol: if category == "OPT" { "AAPL  260618C00200000".into() } else { "AAPL".into() },
      underlying_symbol: Some("AAPL".into()),
      description: "AAPL 18JUN26 200 C".into(),
      buy_sell: buy_sell.into(),
      open_close: Some(open_close.into()),
      quantity: if buy_sell == "BUY" { 1.0 } else { -1.0 },
      trade_price: 3.5,
      commission: -1.05,
      trade_date: Some(d(2025, 1, 15)),
      put_call: put_call.map(Into::into),
      strike: Some(200.0),
      expiry: Some(d(2026, 6, 18)),
      ..Default::default()
    }
  }

  #[test]
  fn test_flex_trade_kinds() {
    assert_eq!(TransactionKind::from_flex_trade(&flex_trade("STK", "BUY", "O", None)), TransactionKind::Buy);
    assert_eq!(TransactionKind::from_flex_trade(&flex_trade("STK", "SELL", "C", None)), TransactionKind::Sell);
    assert_eq!(TransactionKind::from_flex_trade(&flex_trade("OPT", "SELL", "O", Some("C"))), TransactionKind::WriteCall);
    assert_eq!(TransactionKind::from_flex_trade(&flex_trade("OPT", "SELL", "O", Some("P"))), TransactionKind::WritePut);
    assert_eq!(TransactionKind::from_flex_trade(&flex_trade("OPT", "BUY", "O", Some("C"))), TransactionKind::BuyToOpen);
    assert_eq!(TransactionKind::from_flex_trade(&flex_trade("OPT", "BUY", "C", Some("C"))), TransactionKind::BuyToClose);
    assert_eq!(TransactionKind::from_flex_trade(&flex_trade("OPT", "SELL", "C", Some("P"))), TransactionKind::SellToClose);
    assert_eq!(TransactionKind::from_flex_trade(&flex_trade("OPT", "BUY", "C;Ep", Some("C"))), TransactionKind::Expired);
    assert_eq!(TransactionKind::from_flex_trade(&flex_trade("CASH", "BUY", "", None)), TransactionKind::Other);
  }

  #[test]
  fn test_transaction_from_flex_option_trade() {
    let t = Transaction::from_flex_trade(&flex_trade("OPT", "SELL", "O", Some("C"))).unwrap();
    assert_eq!(t.symbol, "-AAPL260618C200");
    assert_eq!(t.kind, TransactionKind::WriteCall);
    assert!((t.amount - (350.0 - 1.05)).abs() < 1e-9);
    assert_eq!(t.fee, 1.05);
    assert_eq!(t.underlying(), "AAPL");
    assert_eq!(TransactionKind::classify(&t.action, &t.symbol), TransactionKind::WriteCall);

    let mut undated = flex_trade("STK", "BUY", "O", None);
    undated.trade_date = None;
    assert!(matches!(Transaction::from_flex_trade(&undated), Err(FlexError::InvalidParameter(_))));
  }

  #[test]
  fn test_option_trade_without_contract_fields_keeps_dash_prefix() {
    let mut bare = flex_trade("OPT", "SELL", "O", Some("C"));
    bare.symbol = "AAPL  250620C00200000".into();
    bare.expiry = None;
    bare.strike = None;
    let t = Transaction::from_flex_trade(&bare).unwrap();
    assert_eq!(t.symbol, "-AAPL250620C200");
    assert_eq!(t.underlying(), "AAPL");

    bare.symbol = "AAPL OPTION".into();
    let t = Transaction::from_flex_trade(&bare).unwrap();
    assert_eq!(t.symbol, "-AAPL");
    assert_eq!(t.underlying(), "AAPL");
  }

  #[test]
  fn test_parse_occ_symbol() {
    let o = OptionSymbol::from_occ("SPY   251219P00512500").unwrap();
    assert_eq!(o.underlying, "SPY");
    assert_eq!(o.expiry, d(2025, 12, 19));
    assert_eq!(o.right, OptionRight::Put);
    assert_eq!(o.strike, 512.5);
    assert!(OptionSymbol::from_occ("AAPL").is_none());
    assert!(OptionSymbol::from_occ("AAPL  250620X00200000").is_none());
    assert!(OptionSymbol::from_occ("AAPL  25062OC00200000").is_none());
  }

  #[test]
  fn test_external_ids() {
    let mut trade = flex_trade("STK", "BUY", "O", None);
    trade.trade_id = Some("111".into());
    assert_eq!(Transaction::from_flex_trade(&trade).unwrap().external_id.as_deref(), Some("trade:111"));

    trade.trade_id = None;
    let first = Transaction::from_flex_trade(&trade).unwrap().external_id;
    assert_eq!(first, Transaction::from_flex_trade(&trade).unwrap().external_id);
    assert!(first.unwrap().starts_with("trade:2025-01-15:AAPL:BUY:"));

    let cash = CashTransaction {
      transaction_id: Some("9001".into()),
      kind: "Dividends".into(),
      symbol: "KO".into(),
      amount: 48.5,
      date: Some(d(2025, 4, 1)),
      ..Default::default()
    };
    assert_eq!(Transaction::from_cash_transaction(&cash).unwrap().external_id.as_deref(), Some("cash:9001"));
    let unnumbered = CashTransaction { transaction_id: None, ..cash };
    assert_eq!(
      Transaction::from_cash_transaction(&unnumbered).unwrap().external_id.as_deref(),
      Some("cash:Dividends:KO:2025-04-01:48.5")
    );
    assert_eq!(Transaction::new(d(2025, 1, 1), "KO", "YOU BOUGHT", "", 1.0, 1.0, -1.0, 0.0).external_id, None);
  }

  #[test]
  fn test_transaction_from_cash_dividend() {
    let cash = CashTransaction {
      transaction_id: None,
      kind: "Dividends".into(),
      symbol: "KO".into(),
      description: "KO CASH DIVIDEND USD 0.485".into(),
      amount: 48.5,
      date: Some(d(2025, 4, 1)),
    };
    let t = Transaction::from_cash_transaction(&cash).unwrap();
    assert_eq!(t.kind, TransactionKind::Dividend);
    assert_eq!(t.action, "DIVIDEND RECEIVED");
    assert_eq!(t.amount, 48.5);

    let tax = CashTransaction { kind: "Withholding Tax".into(), ..cash };
    assert_eq!(Transaction::from_cash_transaction(&tax).unwrap().kind, TransactionKind::Other);
  }
}
