// ibflex/src/parser_flex.rs
// XML decoders for Flex Web Service responses

use crate::base::FlexError;
use crate::flex_data::{
  CashTransaction, EnvelopeStatus, FlexQueryResponse, FlexStatement, FlexTrade, OpenPosition, ReportHandle,
};
use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

const ENVELOPE_ROOT: &[u8] = b"FlexStatementResponse";
const STATEMENT_ROOT: &[u8] = b"FlexQueryResponse";

/// What a `GetStatement` body turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedBody {
  /// A generated statement (`FlexQueryResponse`).
  Statement,
  /// A status envelope, typically "generation in progress" or a failure.
  Envelope(ReportHandle),
}

fn xml_err(context: &str, err: impl std::fmt::Display) -> FlexError {
  FlexError::DecodeError(format!("{}: {}", context, err))
}

// Collect all attributes of a tag, unescaped.
fn attr_map(e: &BytesStart) -> Result<HashMap<Vec<u8>, String>, FlexError> {
  let mut attrs = HashMap::new();
  for attr_result in e.attributes() {
    let attr = attr_result.map_err(|err| xml_err("XML attribute parsing error", err))?;
    let value = attr.unescape_value().map_err(|err| xml_err("Attribute value unescape error", err))?;
    attrs.insert(attr.key.as_ref().to_vec(), value.into_owned());
  }
  Ok(attrs)
}

fn text_attr(attrs: &HashMap<Vec<u8>, String>, key: &[u8]) -> Option<String> {
  attrs.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}

fn string_attr(attrs: &HashMap<Vec<u8>, String>, key: &[u8]) -> String {
  text_attr(attrs, key).unwrap_or_default()
}

// Absent or empty numeric attributes read as zero, like the service's own CSV output.
fn num_attr(attrs: &HashMap<Vec<u8>, String>, key: &[u8]) -> Result<f64, FlexError> {
  match text_attr(attrs, key) {
    None => Ok(0.0),
    Some(v) => v.replace(',', "").parse::<f64>().map_err(|e| {
      FlexError::DecodeError(format!("Attribute {} has non-numeric value '{}': {}", String::from_utf8_lossy(key), v, e))
    }),
  }
}

fn opt_num_attr(attrs: &HashMap<Vec<u8>, String>, key: &[u8]) -> Option<f64> {
  text_attr(attrs, key).and_then(|v| v.parse::<f64>().ok())
}

fn date_attr(attrs: &HashMap<Vec<u8>, String>, key: &[u8]) -> Option<NaiveDate> {
  text_attr(attrs, key).as_deref().and_then(parse_flex_date)
}

/// Parse the date formats Flex queries can be configured to emit:
/// `yyyyMMdd`, `yyyy-MM-dd`, `MM/dd/yyyy`, optionally followed by a time part
/// separated by `;`, `,` or a space.
pub fn parse_flex_date(s: &str) -> Option<NaiveDate> {
  let date_part = s.trim().split(|c| c == ';' || c == ',' || c == ' ').next()?;
  ["%Y%m%d", "%Y-%m-%d", "%m/%d/%Y"]
    .iter()
    .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// Name of the document's root element.
pub fn root_element(xml: &[u8]) -> Result<String, FlexError> {
  let mut reader = Reader::from_reader(xml);
  reader.config_mut().trim_text(true);
  let mut buf = Vec::new();
  loop {
    match reader.read_event_into(&mut buf) {
      Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
        return Ok(String::from_utf8_lossy(e.name().as_ref()).into_owned());
      }
      Ok(Event::Eof) => return Err(FlexError::DecodeError("Empty document, no root element".into())),
      Err(err) => return Err(xml_err("XML parsing error", err)),
      _ => (),
    }
    buf.clear();
  }
}

/// Decode a `FlexStatementResponse` status envelope.
pub fn parse_envelope(xml: &[u8]) -> Result<ReportHandle, FlexError> {
  let mut reader = Reader::from_reader(xml);
  reader.config_mut().trim_text(true);
  let mut buf = Vec::new();

  let mut seen_root = false;
  let mut current: Option<Vec<u8>> = None;
  let mut status: Option<String> = None;
  let mut reference_code = None;
  let mut url = None;
  let mut error_code = None;
  let mut error_message = None;

  loop {
    match reader.read_event_into(&mut buf) {
      Ok(Event::Start(e)) => {
        let name = e.name().as_ref().to_vec();
        if !seen_root {
          if name != ENVELOPE_ROOT {
            return Err(FlexError::DecodeError(format!(
              "Expected FlexStatementResponse, found <{}>", String::from_utf8_lossy(&name)
            )));
          }
          seen_root = true;
        } else {
          current = Some(name);
        }
      }
      Ok(Event::Text(t)) => {
        let text = t.unescape().map_err(|err| xml_err("Text unescape error", err))?.trim().to_string();
        match current.as_deref() {
          Some(b"Status") => status = Some(text),
          Some(b"ReferenceCode") => reference_code = Some(text),
          Some(b"Url") => url = Some(text),
          Some(b"ErrorCode") => error_code = Some(text),
          Some(b"ErrorMessage") => error_message = Some(text),
          _ => {}
        }
      }
      Ok(Event::End(e)) => {
        if e.name().as_ref() == ENVELOPE_ROOT {
          break;
        }
        current = None;
      }
      Ok(Event::Eof) => break,
      Err(err) => return Err(xml_err("XML parsing error in FlexStatementResponse", err)),
      _ => (),
    }
    buf.clear();
  }

  if !seen_root {
    return Err(FlexError::DecodeError("Missing FlexStatementResponse element".into()));
  }
  let status_text = status.ok_or_else(|| FlexError::DecodeError("FlexStatementResponse without <Status>".into()))?;
  let status = EnvelopeStatus::parse(&status_text)
    .ok_or_else(|| FlexError::DecodeError(format!("Unknown envelope status '{}'", status_text)))?;

  Ok(ReportHandle {
    status,
    reference_code: reference_code.filter(|s| !s.is_empty()),
    url: url.filter(|s| !s.is_empty()),
    error_code: error_code.filter(|s| !s.is_empty()),
    error_message: error_message.filter(|s| !s.is_empty()),
  })
}

/// Decide whether a `GetStatement` body is a statement or a status envelope.
pub fn classify_fetched_body(xml: &[u8]) -> Result<FetchedBody, FlexError> {
  let root = root_element(xml)?;
  match root.as_bytes() {
    STATEMENT_ROOT => Ok(FetchedBody::Statement),
    ENVELOPE_ROOT => parse_envelope(xml).map(FetchedBody::Envelope),
    other => Err(FlexError::DecodeError(format!(
      "Unexpected root element <{}> in GetStatement response", String::from_utf8_lossy(other)
    ))),
  }
}

fn parse_trade(e: &BytesStart) -> Result<FlexTrade, FlexError> {
  let a = attr_map(e)?;
  Ok(FlexTrade {
    asset_category: string_attr(&a, b"assetCategory"),
    symbol: string_attr(&a, b"symbol"),
    underlying_symbol: text_attr(&a, b"underlyingSymbol"),
    description: string_attr(&a, b"description"),
    conid: text_attr(&a, b"conid").and_then(|v| v.parse().ok()),
    currency: text_attr(&a, b"currency"),
    buy_sell: string_attr(&a, b"buySell"),
    open_close: text_attr(&a, b"openCloseIndicator"),
    quantity: num_attr(&a, b"quantity")?,
    trade_price: num_attr(&a, b"tradePrice")?,
    cost: num_attr(&a, b"cost")?,
    commission: num_attr(&a, b"ibCommission")?,
    trade_date: date_attr(&a, b"tradeDate"),
    trade_id: text_attr(&a, b"tradeID"),
    put_call: text_attr(&a, b"putCall"),
    strike: opt_num_attr(&a, b"strike"),
    expiry: date_attr(&a, b"expiry"),
  })
}

fn parse_open_position(e: &BytesStart) -> Result<OpenPosition, FlexError> {
  let a = attr_map(e)?;
  Ok(OpenPosition {
    asset_category: string_attr(&a, b"assetCategory"),
    symbol: string_attr(&a, b"symbol"),
    underlying_symbol: text_attr(&a, b"underlyingSymbol"),
    position: num_attr(&a, b"position")?,
    mark_price: num_attr(&a, b"markPrice")?,
    cost_basis_price: num_attr(&a, b"costBasisPrice")?,
    cost_basis_money: num_attr(&a, b"costBasisMoney")?,
    open_date: date_attr(&a, b"openDateTime").or_else(|| date_attr(&a, b"dateTime")),
  })
}

fn parse_cash_transaction(e: &BytesStart) -> Result<CashTransaction, FlexError> {
  let a = attr_map(e)?;
  Ok(CashTransaction {
    transaction_id: text_attr(&a, b"transactionID"),
    kind: string_attr(&a, b"type"),
    symbol: string_attr(&a, b"symbol"),
    description: string_attr(&a, b"description"),
    amount: num_attr(&a, b"amount")?,
    date: date_attr(&a, b"dateTime").or_else(|| date_attr(&a, b"reportDate")),
  })
}

/// Decode a generated `FlexQueryResponse` statement.
pub fn parse_statement(xml: &[u8]) -> Result<FlexQueryResponse, FlexError> {
  let mut reader = Reader::from_reader(xml);
  reader.config_mut().trim_text(true);
  let mut buf = Vec::new();

  let mut response = FlexQueryResponse::default();
  let mut seen_root = false;
  let mut statement: Option<FlexStatement> = None;

  loop {
    let event = reader.read_event_into(&mut buf);
    match event {
      Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
        let is_empty = matches!(event, Ok(Event::Empty(_)));
        match e.name().as_ref() {
          STATEMENT_ROOT => {
            seen_root = true;
            response.query_name = text_attr(&attr_map(e)?, b"queryName");
          }
          _ if !seen_root => {
            return Err(FlexError::DecodeError(format!(
              "Expected FlexQueryResponse, found <{}>", String::from_utf8_lossy(e.name().as_ref())
            )));
          }
          b"FlexStatement" => {
            let a = attr_map(e)?;
            let st = FlexStatement {
              account_id: text_attr(&a, b"accountId"),
              from_date: date_attr(&a, b"fromDate"),
              to_date: date_attr(&a, b"toDate"),
              when_generated: text_attr(&a, b"whenGenerated"),
              ..Default::default()
            };
            if is_empty {
              response.statements.push(st);
            } else {
              statement = Some(st);
            }
          }
          b"Trade" => {
            let trade = parse_trade(e)?;
            statement.get_or_insert_with(FlexStatement::default).trades.push(trade);
          }
          b"OpenPosition" => {
            let pos = parse_open_position(e)?;
            statement.get_or_insert_with(FlexStatement::default).open_positions.push(pos);
          }
          b"CashTransaction" => {
            let cash = parse_cash_transaction(e)?;
            statement.get_or_insert_with(FlexStatement::default).cash_transactions.push(cash);
          }
          _ => {}
        }
      }
      Ok(Event::End(ref e)) => {
        if e.name().as_ref() == b"FlexStatement" {
          if let Some(st) = statement.take() {
            response.statements.push(st);
          }
        }
      }
      Ok(Event::Eof) => break,
      Err(err) => return Err(xml_err("XML parsing error in FlexQueryResponse", err)),
      _ => (),
    }
    buf.clear();
  }

  if !seen_root {
    return Err(FlexError::DecodeError("Missing FlexQueryResponse element".into()));
  }
  // Rows outside any FlexStatement element.
  if let Some(st) = statement.take() {
    response.statements.push(st);
  }
  Ok(response)
}
