// ibflex/src/config.rs
//! TOML configuration loading and validation.

use crate::base::FlexError;
use crate::conn::HttpSettings;
use crate::flex_client::{FlexSettings, DEFAULT_BASE_URL, DEFAULT_VERSION};
use crate::flex_data::ReportRequest;
use crate::portal::DEFAULT_PORTAL_URL;
use crate::retry::{DelayStrategy, RetryPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `ib.flex_token`.
pub const TOKEN_ENV: &str = "FLEX_TOKEN";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FlexConfig {
  pub ib: IbConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub portal: PortalConfig,
  #[serde(default)]
  pub store: StoreConfig,
}

#[derive(Clone, Deserialize)]
pub struct IbConfig {
  #[serde(default)]
  pub flex_token: String,
  #[serde(default)]
  pub query_id: Option<String>,
  #[serde(default = "default_flex_url")]
  pub base_url: String,
  #[serde(default = "default_version")]
  pub version: u32,
}

impl std::fmt::Debug for IbConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("IbConfig")
      .field("flex_token", &"<redacted>")
      .field("query_id", &self.query_id)
      .field("base_url", &self.base_url)
      .field("version", &self.version)
      .finish()
  }
}

fn default_flex_url() -> String {
  DEFAULT_BASE_URL.to_string()
}
fn default_version() -> u32 {
  DEFAULT_VERSION
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
  Fixed,
  Exponential,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub delay_secs: u64,
  pub initial_delay_secs: u64,
  pub backoff: Backoff,
  pub max_delay_secs: u64,
  /// Retry permanent failures too (bad token, invalid query).
  pub retry_all_errors: bool,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      delay_secs: 10,
      initial_delay_secs: 5,
      backoff: Backoff::Fixed,
      max_delay_secs: 60,
      retry_all_errors: false,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
  pub base_url: String,
  pub account_id: Option<String>,
  pub accept_invalid_certs: bool,
  pub timeout_secs: u64,
  /// Snapshot polls before giving up on a price.
  pub price_attempts: u32,
  pub price_delay_ms: u64,
}

impl Default for PortalConfig {
  fn default() -> Self {
    Self {
      base_url: DEFAULT_PORTAL_URL.to_string(),
      account_id: None,
      accept_invalid_certs: true,
      timeout_secs: 30,
      price_attempts: 10,
      price_delay_ms: 500,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  pub path: PathBuf,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self { path: PathBuf::from("transactions.db") }
  }
}

impl FlexConfig {
  /// Load from a TOML file, apply the `FLEX_TOKEN` override, and validate.
  pub fn load(path: &Path) -> Result<Self, FlexError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
      FlexError::ConfigurationError(format!("error loading file {}: {}", path.display(), e))
    })?;
    let mut config = Self::from_toml_str(&content)?;
    if let Ok(token) = std::env::var(TOKEN_ENV) {
      if !token.trim().is_empty() {
        log::debug!("Using Flex token from {}", TOKEN_ENV);
        config.ib.flex_token = token;
      }
    }
    config.validate()?;
    Ok(config)
  }

  /// Parse without validating, so callers can still override fields.
  pub fn from_toml_str(content: &str) -> Result<Self, FlexError> {
    toml::from_str(content).map_err(|e| FlexError::ConfigurationError(format!("invalid configuration: {}", e)))
  }

  pub fn validate(&self) -> Result<(), FlexError> {
    if self.ib.flex_token.trim().is_empty() {
      return Err(FlexError::ConfigurationError("flex_token not found in configuration file".into()));
    }
    if self.ib.base_url.trim().is_empty() {
      return Err(FlexError::ConfigurationError("ib.base_url is empty".into()));
    }
    if self.retry.max_attempts == 0 {
      return Err(FlexError::ConfigurationError("retry.max_attempts must be at least 1".into()));
    }
    if self.portal.price_attempts == 0 {
      return Err(FlexError::ConfigurationError("portal.price_attempts must be at least 1".into()));
    }
    Ok(())
  }

  pub fn flex_settings(&self) -> FlexSettings {
    FlexSettings { base_url: self.ib.base_url.clone(), version: self.ib.version }
  }

  /// Request for `query_id`, or for `ib.query_id` when none is given.
  pub fn report_request(&self, query_id: Option<&str>) -> Result<ReportRequest, FlexError> {
    let query_id = query_id
      .or(self.ib.query_id.as_deref())
      .map(str::trim)
      .filter(|q| !q.is_empty())
      .ok_or_else(|| FlexError::ConfigurationError("No Flex query id: pass one or set ib.query_id".into()))?;
    Ok(ReportRequest::new(query_id, self.ib.flex_token.trim()))
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    let r = &self.retry;
    let delay = match r.backoff {
      Backoff::Fixed => DelayStrategy::Fixed(Duration::from_secs(r.delay_secs)),
      Backoff::Exponential => DelayStrategy::Exponential {
        base: Duration::from_secs(r.delay_secs),
        max: Duration::from_secs(r.max_delay_secs.max(r.delay_secs)),
      },
    };
    let policy = RetryPolicy::new(r.max_attempts, delay).with_initial_delay(Duration::from_secs(r.initial_delay_secs));
    if r.retry_all_errors { policy.retry_everything() } else { policy }
  }

  /// Policy for Client Portal snapshot polling.
  pub fn portal_retry_policy(&self) -> RetryPolicy {
    RetryPolicy::new(self.portal.price_attempts, DelayStrategy::Fixed(Duration::from_millis(self.portal.price_delay_ms)))
      .with_initial_delay(Duration::ZERO)
  }

  pub fn flex_http_settings(&self) -> HttpSettings {
    HttpSettings::default()
  }

  pub fn portal_http_settings(&self) -> HttpSettings {
    HttpSettings {
      timeout: Duration::from_secs(self.portal.timeout_secs),
      accept_invalid_certs: self.portal.accept_invalid_certs,
      cookie_store: true,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use std::io::Write;

  const FULL: &str = r#"
[ib]
flex_token = "abc123"
query_id = "1337940"
version = 3

[retry]
max_attempts = 7
delay_secs = 2
initial_delay_secs = 1
backoff = "exponential"
max_delay_secs = 30

[portal]
base_url = "https://localhost:5001/v1/api"
account_id = "U2609035"
accept_invalid_certs = false

[store]
path = "/tmp/trx.db"
"#;

  fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(content.as_bytes()).unwrap();
    f
  }

  #[test]
  #[serial]
  fn test_load_full_config() {
    std::env::remove_var(TOKEN_ENV);
    let f = write_config(FULL);
    let c = FlexConfig::load(f.path()).unwrap();
    assert_eq!(c.ib.flex_token, "abc123");
    assert_eq!(c.ib.query_id.as_deref(), Some("1337940"));
    assert_eq!(c.ib.base_url, DEFAULT_BASE_URL);
    assert_eq!(c.portal.account_id.as_deref(), Some("U2609035"));
    assert!(!c.portal.accept_invalid_certs);
    assert_eq!(c.portal.price_attempts, 10);
    assert_eq!(c.store.path, PathBuf::from("/tmp/trx.db"));

    let p = c.retry_policy();
    assert_eq!(p.max_attempts, 7);
    assert_eq!(p.initial_delay, Duration::from_secs(1));
    assert_eq!(p.delay_for(1), Duration::from_secs(2));
    assert_eq!(p.delay_for(2), Duration::from_secs(4));
    assert_eq!(p.delay_for(10), Duration::from_secs(30));
  }

  #[test]
  #[serial]
  fn test_defaults_for_missing_sections() {
    std::env::remove_var(TOKEN_ENV);
    let f = write_config("[ib]\nflex_token = \"tok\"\n");
    let c = FlexConfig::load(f.path()).unwrap();
    assert_eq!(c.ib.version, 3);
    assert_eq!(c.portal.base_url, DEFAULT_PORTAL_URL);
    let p = c.retry_policy();
    assert_eq!(p.max_attempts, 5);
    assert_eq!(p.delay_for(3), Duration::from_secs(10));
    assert!(!p.should_retry(&FlexError::DecodeError("x".into())));
  }

  #[test]
  #[serial]
  fn test_missing_or_empty_token_is_fatal() {
    std::env::remove_var(TOKEN_ENV);
    let f = write_config("[ib]\nflex_token = \"  \"\n");
    assert!(matches!(FlexConfig::load(f.path()), Err(FlexError::ConfigurationError(_))));
    let f = write_config("[ib]\nquery_id = \"1\"\n");
    assert!(matches!(FlexConfig::load(f.path()), Err(FlexError::ConfigurationError(_))));
    assert!(matches!(FlexConfig::load(Path::new("/definitely/not/here.toml")), Err(FlexError::ConfigurationError(_))));
    let f = write_config("[ib\nflex_token=");
    assert!(matches!(FlexConfig::load(f.path()), Err(FlexError::ConfigurationError(_))));
  }

  #[test]
  #[serial]
  fn test_env_token_override() {
    let f = write_config("[ib]\nflex_token = \"\"\n");
    std::env::set_var(TOKEN_ENV, "from-env");
    let c = FlexConfig::load(f.path());
    std::env::remove_var(TOKEN_ENV);
    assert_eq!(c.unwrap().report_request(Some("1")).unwrap().token, "from-env");
  }

  #[test]
  fn test_retry_all_errors_flag() {
    let c = FlexConfig::from_toml_str("[ib]\nflex_token = \"t\"\n[retry]\nretry_all_errors = true\n").unwrap();
    assert!(c.retry_policy().should_retry(&FlexError::DecodeError("x".into())));
  }

  #[test]
  fn test_report_request_query_id() {
    let c = FlexConfig::from_toml_str("[ib]\nflex_token = \" tok \"\nquery_id = \"1337940\"\n").unwrap();
    assert_eq!(c.report_request(None).unwrap(), ReportRequest::new("1337940", "tok"));
    assert_eq!(c.report_request(Some(" 42 ")).unwrap().query_id, "42");
    let c = FlexConfig::from_toml_str("[ib]\nflex_token = \"tok\"\n").unwrap();
    assert!(matches!(c.report_request(None), Err(FlexError::ConfigurationError(_))));
    assert!(!format!("{:?}", c.report_request(Some("1")).unwrap()).contains("tok\""));
  }

  #[test]
  fn test_debug_redacts_token() {
    let c = FlexConfig::from_toml_str("[ib]\nflex_token = \"supersecret\"\n").unwrap();
    assert!(!format!("{:?}", c).contains("supersecret"));
  }
}
