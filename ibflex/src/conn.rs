// ibflex/src/conn.rs

use crate::base::FlexError;
pub use http::{HttpSettings, HttpTransport};
pub use reqwest::Url;

/// Trait defining the single outbound call the clients need: a blocking GET
/// returning the response body.
///
/// Implementations map network failures to `FlexError::TransportError` and
/// non-2xx responses to `FlexError::HttpStatus`.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
  fn get(&self, url: &Url) -> Result<String, FlexError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
  fn get(&self, url: &Url) -> Result<String, FlexError> {
    (**self).get(url)
  }
}

impl<T: Transport + ?Sized> Transport for &T {
  fn get(&self, url: &Url) -> Result<String, FlexError> {
    (**self).get(url)
  }
}

/// Query parameters that must never reach logs or recordings.
const SECRET_PARAMS: &[&str] = &["t"];

/// URL as text with secret query parameters replaced.
pub fn redact_url(url: &Url) -> String {
  if !url.query_pairs().any(|(k, _)| SECRET_PARAMS.contains(&k.as_ref())) {
    return url.to_string();
  }
  let mut redacted = url.clone();
  let pairs: Vec<(String, String)> = url
    .query_pairs()
    .map(|(k, v)| {
      let v = if SECRET_PARAMS.contains(&k.as_ref()) { "<redacted>".to_string() } else { v.into_owned() };
      (k.into_owned(), v)
    })
    .collect();
  redacted.query_pairs_mut().clear().extend_pairs(pairs);
  redacted.to_string()
}

mod http {
  use log::{debug, trace};
  use reqwest::blocking::Client;
  use std::time::Duration;

  use super::{redact_url, Transport, Url};
  use crate::base::FlexError;

  /// Options for the HTTP client.
  #[derive(Debug, Clone)]
  pub struct HttpSettings {
    pub timeout: Duration,
    /// The Client Portal Gateway serves a self-signed certificate on localhost.
    pub accept_invalid_certs: bool,
    /// Keep session cookies between calls (Client Portal authentication).
    pub cookie_store: bool,
  }

  impl Default for HttpSettings {
    fn default() -> Self {
      Self { timeout: Duration::from_secs(30), accept_invalid_certs: false, cookie_store: false }
    }
  }

  /// Blocking reqwest transport.
  pub struct HttpTransport {
    client: Client,
  }

  impl HttpTransport {
    pub fn new(settings: &HttpSettings) -> Result<Self, FlexError> {
      let client = Client::builder()
        .timeout(settings.timeout)
        .cookie_store(settings.cookie_store)
        .danger_accept_invalid_certs(settings.accept_invalid_certs)
        .user_agent(concat!("ibflex/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FlexError::ConfigurationError(format!("Failed to build HTTP client: {}", e)))?;
      Ok(Self { client })
    }
  }

  impl Transport for HttpTransport {
    fn get(&self, url: &Url) -> Result<String, FlexError> {
      let shown = redact_url(url);
      debug!("GET {}", shown);
      let resp = self
        .client
        .get(url.clone())
        .send()
        .map_err(|e| FlexError::TransportError(format!("GET {} failed: {}", shown, e.without_url())))?;

      let status = resp.status();
      let body = resp
        .text()
        .map_err(|e| FlexError::TransportError(format!("Reading body of {} failed: {}", shown, e.without_url())))?;
      trace!("GET {} -> {} ({} bytes)", shown, status, body.len());

      if !status.is_success() {
        return Err(FlexError::HttpStatus { status: status.as_u16(), body });
      }
      Ok(body)
    }
  }
}

/// Test transport answering from a fixed script and remembering what was asked.
#[cfg(test)]
pub(crate) struct ScriptedTransport {
  responses: parking_lot::Mutex<std::collections::VecDeque<Result<String, FlexError>>>,
  requests: parking_lot::Mutex<Vec<Url>>,
}

#[cfg(test)]
impl ScriptedTransport {
  pub(crate) fn new(responses: Vec<Result<String, FlexError>>) -> Self {
    Self { responses: parking_lot::Mutex::new(responses.into()), requests: parking_lot::Mutex::new(Vec::new()) }
  }

  pub(crate) fn requests(&self) -> Vec<Url> {
    self.requests.lock().clone()
  }
}

#[cfg(test)]
impl Transport for ScriptedTransport {
  fn get(&self, url: &Url) -> Result<String, FlexError> {
    self.requests.lock().push(url.clone());
    self.responses
      .lock()
      .pop_front()
      .unwrap_or_else(|| Err(FlexError::ReplayError(format!("script exhausted at {}", url))))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_redact_token() {
    let url = Url::parse("https://example.com/FlexWebService/SendRequest?t=SECRET123&q=42&v=3").unwrap();
    let shown = redact_url(&url);
    assert!(!shown.contains("SECRET123"));
    assert!(shown.contains("q=42"));
    assert!(shown.contains("v=3"));
  }

  #[test]
  fn test_redact_leaves_plain_urls() {
    let url = Url::parse("https://localhost:5000/v1/api/trsrv/stocks?symbols=AAPL").unwrap();
    assert_eq!(redact_url(&url), url.to_string());
  }

  #[test]
  fn test_boxed_transport_delegates() {
    let mut mock = MockTransport::new();
    mock.expect_get().times(1).returning(|u| Ok(u.path().to_string()));
    let boxed: Box<dyn Transport> = Box::new(mock);
    let url = Url::parse("https://example.com/a/b").unwrap();
    assert_eq!(boxed.get(&url).unwrap(), "/a/b");
  }
}
