// ibflex/src/portal.rs
//! Client Portal Gateway REST client: positions, contract lookup and
//! last-price snapshots.
//!
//! The gateway runs locally and must already be authenticated. Requests go
//! through a [`Transport`] so the same client works against a live gateway,
//! a recorded session, or a test script.

use crate::base::FlexError;
use crate::conn::{Transport, Url};
use crate::retry::{CancelToken, RetryPolicy, Sleeper, ThreadSleeper};

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;

pub const DEFAULT_PORTAL_URL: &str = "https://localhost:5000/v1/api";

/// Snapshot field carrying the last traded price.
const LAST_PRICE_FIELD: &str = "31";

/// Exchanges accepted when resolving a stock symbol.
const STOCK_EXCHANGES: &[&str] = &["NASDAQ", "ISLAND", "NYSE"];

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortalPosition {
  pub conid: i64,
  #[serde(default)]
  pub acct_id: Option<String>,
  #[serde(default)]
  pub contract_desc: Option<String>,
  pub position: f64,
  #[serde(default)]
  pub avg_cost: f64,
  #[serde(default)]
  pub mkt_price: Option<f64>,
  #[serde(default)]
  pub mkt_value: Option<f64>,
  #[serde(default)]
  pub unrealized_pnl: Option<f64>,
  #[serde(default)]
  pub asset_class: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StockContract {
  conid: i64,
  #[serde(default)]
  exchange: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolData {
  #[serde(default)]
  contracts: Vec<StockContract>,
}

/// Blocking client for the Client Portal Gateway.
pub struct PortalClient<T: Transport, S: Sleeper = ThreadSleeper> {
  transport: T,
  base_url: String,
  policy: RetryPolicy,
  sleeper: S,
  conid_cache: Mutex<HashMap<String, i64>>,
}

impl<T: Transport> PortalClient<T, ThreadSleeper> {
  pub fn new(transport: T, base_url: &str, policy: RetryPolicy) -> Self {
    Self::with_sleeper(transport, base_url, policy, ThreadSleeper)
  }
}

impl<T: Transport, S: Sleeper> PortalClient<T, S> {
  pub fn with_sleeper(transport: T, base_url: &str, policy: RetryPolicy, sleeper: S) -> Self {
    Self {
      transport,
      base_url: base_url.trim_end_matches('/').to_string(),
      policy,
      sleeper,
      conid_cache: Mutex::new(HashMap::new()),
    }
  }

  fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, FlexError> {
    let raw = format!("{}/{}", self.base_url, path);
    Url::parse_with_params(&raw, query)
      .map_err(|e| FlexError::ConfigurationError(format!("Invalid portal URL '{}': {}", raw, e)))
  }

  fn get_json<D: serde::de::DeserializeOwned>(&self, url: &Url) -> Result<D, FlexError> {
    let body = self.transport.get(url)?;
    serde_json::from_str(&body).map_err(|e| FlexError::DecodeError(format!("Unexpected JSON from {}: {}", url.path(), e)))
  }

  /// Open positions of `account_id` (first page).
  pub fn positions(&self, account_id: &str) -> Result<Vec<PortalPosition>, FlexError> {
    if account_id.trim().is_empty() {
      return Err(FlexError::InvalidParameter("account id is empty".into()));
    }
    let url = self.endpoint(&format!("portfolio/{}/positions", account_id.trim()), &[])?;
    let positions: Vec<PortalPosition> = self.get_json(&url)?;
    info!("Fetched {} positions for account {}", positions.len(), account_id);
    Ok(positions)
  }

  /// US stock conids for `symbol`, listed on NASDAQ/ISLAND or NYSE, in
  /// response order.
  pub fn stock_conids(&self, symbol: &str) -> Result<Vec<i64>, FlexError> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
      return Err(FlexError::InvalidParameter("symbol is empty".into()));
    }
    let url = self.endpoint("trsrv/stocks", &[("symbols", &symbol)])?;
    let result: HashMap<String, Vec<SymbolData>> = self.get_json(&url)?;
    let conids: Vec<i64> = result
      .get(&symbol)
      .into_iter()
      .flatten()
      .flat_map(|data| data.contracts.iter())
      .filter(|c| STOCK_EXCHANGES.contains(&c.exchange.to_uppercase().as_str()))
      .map(|c| c.conid)
      .collect();
    debug!("Conids for {}: {:?}", symbol, conids);
    Ok(conids)
  }

  /// First listed conid for `symbol`. Lookups are cached per client.
  pub fn conid(&self, symbol: &str) -> Result<i64, FlexError> {
    let key = symbol.trim().to_uppercase();
    if let Some(conid) = self.conid_cache.lock().get(&key) {
      return Ok(*conid);
    }
    let conid = self
      .stock_conids(&key)?
      .into_iter()
      .next()
      .ok_or_else(|| FlexError::InvalidParameter(format!("No NASDAQ/NYSE listing found for '{}'", key)))?;
    self.conid_cache.lock().insert(key, conid);
    Ok(conid)
  }

  /// One snapshot read of the last price.
  ///
  /// The gateway answers the first snapshot for a conid without fields, so a
  /// missing price is reported as `NotReady`.
  pub fn last_price(&self, conid: i64) -> Result<f64, FlexError> {
    let conid_text = conid.to_string();
    let url = self.endpoint("iserver/marketdata/snapshot", &[("conids", &conid_text), ("fields", LAST_PRICE_FIELD)])?;
    let snapshot: Vec<serde_json::Map<String, serde_json::Value>> = self.get_json(&url)?;
    let first = snapshot
      .first()
      .ok_or_else(|| FlexError::NotReady(format!("No market data returned for conid {}", conid)))?;
    match first.get(LAST_PRICE_FIELD) {
      Some(value) => parse_price_value(value),
      None => match first.get("error") {
        Some(err) => Err(FlexError::RemoteError {
          code: String::new(),
          message: format!("conid {}: {}", conid, err.as_str().map_or_else(|| err.to_string(), str::to_string)),
        }),
        None => Err(FlexError::NotReady(format!("Field {} missing in snapshot for conid {}", LAST_PRICE_FIELD, conid))),
      },
    }
  }

  /// Last price of `symbol`, polling the snapshot under the client's policy.
  pub fn price(&self, symbol: &str, cancel: &CancelToken) -> Result<f64, FlexError> {
    let conid = self.conid(symbol)?;
    let price = self.policy.run(
      &self.sleeper,
      cancel,
      |_| self.last_price(conid),
      |attempt, e| warn!("Snapshot {} for {} not usable ({}), retrying", attempt, symbol, e),
    )?;
    debug!("{} (conid {}) last price {}", symbol, conid, price);
    Ok(price)
  }
}

/// Field 31 arrives as a number or as text, with a `C` (previous close) or
/// `H` (halted) prefix when the market is not trading.
fn parse_price_value(value: &serde_json::Value) -> Result<f64, FlexError> {
  match value {
    serde_json::Value::Number(n) => n
      .as_f64()
      .ok_or_else(|| FlexError::DecodeError(format!("Price {} is not representable", n))),
    serde_json::Value::String(s) => {
      let cleaned = s.trim().trim_start_matches(['C', 'H']).replace(',', "");
      cleaned.parse::<f64>().map_err(|e| FlexError::DecodeError(format!("Price '{}' failed to parse: {}", s, e)))
    }
    other => Err(FlexError::DecodeError(format!("Price has unexpected JSON type: {}", other))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::conn::ScriptedTransport;
  use crate::retry::{DelayStrategy, RecordingSleeper};
  use std::time::Duration;

  const STOCKS_JSON: &str = r#"{"TSCO":[{"name":"TRACTOR SUPPLY CO","assetClass":"STK","contracts":[
      {"conid":1111,"exchange":"MEXI","isUS":false},
      {"conid":2222,"exchange":"NASDAQ","isUS":true},
      {"conid":3333,"exchange":"nyse","isUS":true}]}]}"#;

  fn client(responses: Vec<Result<String, FlexError>>) -> PortalClient<ScriptedTransport, RecordingSleeper> {
    let policy = RetryPolicy::new(3, DelayStrategy::Fixed(Duration::from_millis(500))).with_initial_delay(Duration::ZERO);
    PortalClient::with_sleeper(ScriptedTransport::new(responses), DEFAULT_PORTAL_URL, policy, RecordingSleeper::new())
  }

  #[test]
  fn test_stock_conids_filter_exchanges() {
    let c = client(vec![Ok(STOCKS_JSON.into())]);
    assert_eq!(c.stock_conids("tsco").unwrap(), vec![2222, 3333]);
    let req = &c.transport.requests()[0];
    assert_eq!(req.path(), "/v1/api/trsrv/stocks");
    assert_eq!(req.query(), Some("symbols=TSCO"));
  }

  #[test]
  fn test_conid_takes_first_match_and_caches() {
    let c = client(vec![Ok(STOCKS_JSON.into())]);
    assert_eq!(c.conid("TSCO").unwrap(), 2222);
    assert_eq!(c.conid("tsco").unwrap(), 2222);
    assert_eq!(c.transport.requests().len(), 1);
  }

  #[test]
  fn test_conid_without_listing() {
    let c = client(vec![Ok(r#"{"XYZ":[{"contracts":[{"conid":1,"exchange":"LSE"}]}]}"#.into())]);
    assert!(matches!(c.conid("XYZ"), Err(FlexError::InvalidParameter(_))));
  }

  #[test]
  fn test_parse_price_variants() {
    assert_eq!(parse_price_value(&serde_json::json!(187.45)).unwrap(), 187.45);
    assert_eq!(parse_price_value(&serde_json::json!("187.45")).unwrap(), 187.45);
    assert_eq!(parse_price_value(&serde_json::json!("C187.45")).unwrap(), 187.45);
    assert_eq!(parse_price_value(&serde_json::json!("H12.5")).unwrap(), 12.5);
    assert_eq!(parse_price_value(&serde_json::json!("1,024.10")).unwrap(), 1024.1);
    assert!(matches!(parse_price_value(&serde_json::json!("n/a")), Err(FlexError::DecodeError(_))));
    assert!(matches!(parse_price_value(&serde_json::json!(null)), Err(FlexError::DecodeError(_))));
  }

  #[test]
  fn test_last_price_outcomes() {
    let c = client(vec![
      Ok(r#"[{"conid":2222,"31":"C250.10"}]"#.into()),
      Ok(r#"[{"conid":2222,"conidEx":"2222"}]"#.into()),
      Ok(r#"[{"conid":2222,"error":"no market data permissions"}]"#.into()),
      Ok("[]".into()),
      Ok("<html>login</html>".into()),
    ]);
    assert_eq!(c.last_price(2222).unwrap(), 250.10);
    assert!(matches!(c.last_price(2222), Err(FlexError::NotReady(_))));
    match c.last_price(2222) {
      Err(e @ FlexError::RemoteError { .. }) => {
        assert_eq!(e.remote_code(), None);
        assert!(e.to_string().contains("conid 2222: no market data permissions"));
      }
      other => panic!("unexpected result: {:?}", other),
    }
    assert!(matches!(c.last_price(2222), Err(FlexError::NotReady(_))));
    assert!(matches!(c.last_price(2222), Err(FlexError::DecodeError(_))));
    assert_eq!(c.transport.requests()[0].query(), Some("conids=2222&fields=31"));
  }

  #[test]
  fn test_price_polls_until_snapshot_has_field() {
    let c = client(vec![
      Ok(STOCKS_JSON.into()),
      Ok(r#"[{"conid":2222}]"#.into()),
      Ok(r#"[{"conid":2222}]"#.into()),
      Ok(r#"[{"conid":2222,"31":251.5}]"#.into()),
    ]);
    assert_eq!(c.price("TSCO", &CancelToken::new()).unwrap(), 251.5);
    assert_eq!(c.sleeper.slept(), vec![Duration::from_millis(500); 2]);
  }

  #[test]
  fn test_price_gives_up_after_policy_bound() {
    let c = client(vec![
      Ok(STOCKS_JSON.into()),
      Ok("[{}]".into()),
      Ok("[{}]".into()),
      Ok("[{}]".into()),
    ]);
    match c.price("TSCO", &CancelToken::new()) {
      Err(FlexError::RetriesExhausted { attempts, last }) => {
        assert_eq!(attempts, 3);
        assert!(matches!(*last, FlexError::NotReady(_)));
      }
      other => panic!("unexpected: {:?}", other),
    }
  }

  #[test]
  fn test_positions() {
    let body = r#"[{"acctId":"U123","conid":265598,"contractDesc":"AAPL","position":100.0,"mktPrice":230.5,
                    "mktValue":23050.0,"avgCost":150.0,"unrealizedPnl":8050.0,"assetClass":"STK","currency":"USD"}]"#;
    let c = client(vec![Ok(body.into())]);
    let positions = c.positions("U123").unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].contract_desc.as_deref(), Some("AAPL"));
    assert_eq!(positions[0].unrealized_pnl, Some(8050.0));
    assert_eq!(c.transport.requests()[0].path(), "/v1/api/portfolio/U123/positions");
    assert!(matches!(c.positions(" "), Err(FlexError::InvalidParameter(_))));
  }

  #[test]
  fn test_http_error_passes_through() {
    let c = client(vec![Err(FlexError::HttpStatus { status: 401, body: "not authenticated".into() })]);
    assert!(matches!(c.positions("U1"), Err(FlexError::HttpStatus { status: 401, .. })));
  }
}
