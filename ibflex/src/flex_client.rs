// ibflex/src/flex_client.rs
//! Flex Web Service client.
//!
//! Retrieving a Flex statement is a two step workflow: `SendRequest` asks the
//! service to generate a report for a query id and returns a reference code;
//! `GetStatement` later fetches the generated XML for that code. Generation is
//! asynchronous and there is no notification, so the fetch step is polled under
//! a [`RetryPolicy`]. The `<Status>` of the response envelope decides whether a
//! fetch succeeded; HTTP 200 alone means nothing.

use crate::base::{flex_error_code, FlexError};
use crate::conn::{redact_url, Transport, Url};
use crate::flex_data::{EnvelopeStatus, ReportHandle, ReportPayload, ReportRequest, Retrieval, WorkflowState};
use crate::parser_flex::{classify_fetched_body, parse_envelope, FetchedBody};
use crate::retry::{CancelToken, RetryPolicy, Sleeper, ThreadSleeper};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

pub const DEFAULT_BASE_URL: &str = "https://ndcdyn.interactivebrokers.com/AccountManagement/FlexWebService";
pub const DEFAULT_VERSION: u32 = 3;

const SEND_REQUEST: &str = "SendRequest";
const GET_STATEMENT: &str = "GetStatement";

/// Where to reach the Flex Web Service. Credentials travel in [`ReportRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexSettings {
  pub base_url: String,
  pub version: u32,
}

impl Default for FlexSettings {
  fn default() -> Self {
    Self { base_url: DEFAULT_BASE_URL.to_string(), version: DEFAULT_VERSION }
  }
}

fn remote_error(handle: &ReportHandle) -> FlexError {
  FlexError::RemoteError {
    code: handle.error_code.clone().unwrap_or_default(),
    message: handle.error_message.clone().unwrap_or_default(),
  }
}

/// Reference code carried by a `GetStatement` URL.
pub fn reference_code_from_url(url: &Url) -> Option<String> {
  url.query_pairs().find(|(k, _)| k == "q").map(|(_, v)| v.into_owned())
}

pub struct FlexClient<T: Transport, S: Sleeper = ThreadSleeper> {
  transport: T,
  settings: FlexSettings,
  policy: RetryPolicy,
  sleeper: S,
  states: Mutex<Vec<WorkflowState>>,
}

impl<T: Transport> FlexClient<T, ThreadSleeper> {
  pub fn new(transport: T, settings: FlexSettings, policy: RetryPolicy) -> Self {
    Self::with_sleeper(transport, settings, policy, ThreadSleeper)
  }
}

impl<T: Transport, S: Sleeper> FlexClient<T, S> {
  pub fn with_sleeper(transport: T, settings: FlexSettings, policy: RetryPolicy, sleeper: S) -> Self {
    Self { transport, settings, policy, sleeper, states: Mutex::new(vec![WorkflowState::Idle]) }
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  pub fn sleeper(&self) -> &S {
    &self.sleeper
  }

  /// States walked by the most recent [`retrieve`](Self::retrieve), whether it
  /// succeeded or not. `[Idle]` before the first run.
  pub fn workflow_states(&self) -> Vec<WorkflowState> {
    self.states.lock().clone()
  }

  fn endpoint(&self, name: &str, token: &str, q: &str) -> Result<Url, FlexError> {
    let base = self.settings.base_url.trim_end_matches('/');
    let version = self.settings.version.to_string();
    Url::parse_with_params(&format!("{}/{}", base, name), &[("t", token), ("q", q), ("v", version.as_str())])
      .map_err(|e| FlexError::ConfigurationError(format!("Invalid Flex base URL '{}': {}", self.settings.base_url, e)))
  }

  pub fn send_request_url(&self, request: &ReportRequest) -> Result<Url, FlexError> {
    self.endpoint(SEND_REQUEST, request.token.trim(), request.query_id.trim())
  }

  pub fn get_statement_url(&self, reference_code: &str, token: &str) -> Result<Url, FlexError> {
    self.endpoint(GET_STATEMENT, token.trim(), reference_code)
  }

  /// Ask the service to generate the report for `request.query_id`.
  ///
  /// Returns the envelope on `Success`; any other status becomes
  /// `FlexError::RemoteError` carrying the service's own code and message.
  pub fn request_report(&self, request: &ReportRequest) -> Result<ReportHandle, FlexError> {
    let query_id = request.query_id.trim();
    if query_id.is_empty() {
      return Err(FlexError::InvalidParameter("Flex query id is empty".into()));
    }
    if request.token.trim().is_empty() {
      return Err(FlexError::InvalidParameter("Flex token is empty".into()));
    }
    let url = self.send_request_url(request)?;
    debug!("Requesting Flex report: {}", redact_url(&url));
    let body = self.transport.get(&url)?;
    let handle = parse_envelope(body.as_bytes())?;

    match handle.status {
      EnvelopeStatus::Success => {
        if handle.reference_code.is_none() {
          return Err(FlexError::DecodeError("Success envelope without ReferenceCode".into()));
        }
        info!("Report requested. Reference Code: {}", handle.reference_code.as_deref().unwrap_or_default());
        Ok(handle)
      }
      EnvelopeStatus::Warn | EnvelopeStatus::Fail => {
        let err = remote_error(&handle);
        error!("Error requesting report for query {}: {}", query_id, err);
        Err(err)
      }
    }
  }

  /// One `GetStatement` call.
  ///
  /// A `FlexQueryResponse` body is the statement. A status envelope means the
  /// statement is not available and is returned as `RemoteError` (transient
  /// for "try again shortly" codes such as 1019).
  pub fn fetch_report(&self, reference_code: &str, token: &str) -> Result<ReportPayload, FlexError> {
    if reference_code.trim().is_empty() {
      return Err(FlexError::InvalidParameter("Reference code is empty".into()));
    }
    let url = self.get_statement_url(reference_code, token)?;
    debug!("Fetching Flex statement: {}", redact_url(&url));
    let body = self.transport.get(&url)?;

    match classify_fetched_body(body.as_bytes())? {
      FetchedBody::Statement => Ok(ReportPayload(body.into_bytes())),
      FetchedBody::Envelope(handle) if handle.status == EnvelopeStatus::Success => {
        Err(FlexError::NotReady(format!("Statement {} reported Success without data", reference_code)))
      }
      FetchedBody::Envelope(handle) => {
        let err = remote_error(&handle);
        if let Some(known) = handle.error_code.as_deref().and_then(flex_error_code) {
          debug!("Statement {} not available: {} ({})", reference_code, known.description,
                 if known.retryable { "retryable" } else { "permanent" });
        }
        Err(err)
      }
    }
  }

  /// Full request / poll / fetch workflow for `request`.
  ///
  /// Errors from the request step abort immediately. Fetch errors are retried
  /// while the policy deems them retryable; running out of attempts yields
  /// `FlexError::RetriesExhausted` with the last error. `cancel` interrupts
  /// any wait with `FlexError::Cancelled`. The states walked are available
  /// from [`workflow_states`](Self::workflow_states) either way.
  pub fn retrieve(&self, request: &ReportRequest, cancel: &CancelToken) -> Result<Retrieval, FlexError> {
    *self.states.lock() = vec![WorkflowState::Idle];
    let transition = |s: WorkflowState| {
      debug!("Flex workflow -> {:?}", s);
      self.states.lock().push(s);
    };

    let handle = self.request_report(request)?;
    let reference_code = handle.reference_code.unwrap_or_default();
    transition(WorkflowState::Requested);

    transition(WorkflowState::Pending);
    if !self.policy.initial_delay.is_zero() {
      info!("Waiting {:?} for IBKR to generate the report...", self.policy.initial_delay);
    }
    self.sleeper.sleep(self.policy.initial_delay, cancel)?;

    let attempts = std::cell::Cell::new(0u32);
    let result = self.policy.run(
      &self.sleeper,
      cancel,
      |attempt| {
        attempts.set(attempt);
        transition(WorkflowState::Fetching);
        info!("Attempt {}: Fetching report...", attempt);
        self.fetch_report(&reference_code, &request.token)
      },
      |attempt, err| {
        warn!("Report not ready after attempt {} ({}). Retrying in {:?}...", attempt, err, self.policy.delay_for(attempt));
        transition(WorkflowState::Pending);
      },
    );

    match result {
      Ok(payload) => {
        transition(WorkflowState::Ready);
        info!("Retrieved statement {} ({} bytes) after {} attempt(s)", reference_code, payload.as_bytes().len(), attempts.get());
        Ok(Retrieval { reference_code, payload, attempts: attempts.get(), states: self.workflow_states() })
      }
      Err(e) => {
        if matches!(e, FlexError::RetriesExhausted { .. }) {
          transition(WorkflowState::Exhausted);
        }
        error!("Failed to retrieve statement {}: {}", reference_code, e);
        debug!("Flex workflow states: {:?}", self.states.lock());
        Err(e)
      }
    }
  }
}
