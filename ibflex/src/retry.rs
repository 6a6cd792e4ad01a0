// ibflex/src/retry.rs
//! Retry policy, sleeping and cancellation for polling workflows.
//!
//! The Flex Web Service builds statements asynchronously and never notifies the
//! caller, so the client polls. How often and for how long is described by a
//! [`RetryPolicy`]; the actual waiting goes through a [`Sleeper`] so that tests
//! can run the workflow without wall-clock delays.

use crate::base::FlexError;
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How long to wait between two attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DelayStrategy {
  /// Same delay before every retry.
  Fixed(Duration),
  /// `base * 2^(attempt-1)`, capped at `max`.
  Exponential { base: Duration, max: Duration },
}

impl DelayStrategy {
  /// Delay to apply after the given (1-based) failed attempt.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    match *self {
      DelayStrategy::Fixed(d) => d,
      DelayStrategy::Exponential { base, max } => {
        let shift = attempt.saturating_sub(1).min(16);
        base.checked_mul(1u32 << shift).map_or(max, |d| d.min(max))
      }
    }
  }
}

/// Bounded retry description injected into the clients.
#[derive(Clone)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub delay: DelayStrategy,
  /// Wait before the first attempt.
  pub initial_delay: Duration,
  pub retryable: fn(&FlexError) -> bool,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      delay: DelayStrategy::Fixed(Duration::from_secs(10)),
      initial_delay: Duration::from_secs(5),
      retryable: FlexError::is_transient,
    }
  }
}

impl std::fmt::Debug for RetryPolicy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RetryPolicy")
      .field("max_attempts", &self.max_attempts)
      .field("delay", &self.delay)
      .field("initial_delay", &self.initial_delay)
      .finish()
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, delay: DelayStrategy) -> Self {
    Self { max_attempts, delay, ..Self::default() }
  }

  pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
    self.initial_delay = initial_delay;
    self
  }

  pub fn with_retryable(mut self, retryable: fn(&FlexError) -> bool) -> Self {
    self.retryable = retryable;
    self
  }

  /// Retry every failure identically, whatever its cause.
  pub fn retry_everything(self) -> Self {
    self.with_retryable(FlexError::always)
  }

  pub fn should_retry(&self, err: &FlexError) -> bool {
    (self.retryable)(err)
  }

  pub fn delay_for(&self, attempt: u32) -> Duration {
    self.delay.delay_for(attempt)
  }

  /// Run `op` until it succeeds, fails permanently, or the attempt bound is hit.
  ///
  /// `op` receives the 1-based attempt number. `on_retry` is invoked with the
  /// attempt number and the error just before each inter-attempt wait.
  pub fn run<T, F, R>(&self, sleeper: &dyn Sleeper, cancel: &CancelToken, mut op: F, mut on_retry: R) -> Result<T, FlexError>
  where
    F: FnMut(u32) -> Result<T, FlexError>,
    R: FnMut(u32, &FlexError),
  {
    let max_attempts = self.max_attempts.max(1);
    let mut attempt = 1;
    loop {
      if cancel.is_cancelled() {
        return Err(FlexError::Cancelled);
      }
      match op(attempt) {
        Ok(v) => return Ok(v),
        Err(e) if !self.should_retry(&e) => return Err(e),
        Err(e) if attempt >= max_attempts => {
          return Err(FlexError::RetriesExhausted { attempts: attempt, last: Box::new(e) });
        }
        Err(e) => {
          on_retry(attempt, &e);
          sleeper.sleep(self.delay_for(attempt), cancel)?;
          attempt += 1;
        }
      }
    }
  }
}

/// Something that can block the current thread for a while.
pub trait Sleeper {
  /// Wait for `duration`, returning `Err(FlexError::Cancelled)` if `cancel`
  /// fires first.
  fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<(), FlexError>;
}

/// Real sleeper, parks on the cancel token's condvar.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
  fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<(), FlexError> {
    if duration.is_zero() {
      return if cancel.is_cancelled() { Err(FlexError::Cancelled) } else { Ok(()) };
    }
    debug!("Sleeping {:?}", duration);
    if cancel.wait_timeout(duration) {
      Err(FlexError::Cancelled)
    } else {
      Ok(())
    }
  }
}

/// Records requested sleeps instead of waiting. Cancels itself after
/// `cancel_after` sleeps when set.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
  slept: Mutex<Vec<Duration>>,
  cancel_after: Option<usize>,
}

impl RecordingSleeper {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancelling_after(count: usize) -> Self {
    Self { slept: Mutex::new(Vec::new()), cancel_after: Some(count) }
  }

  pub fn slept(&self) -> Vec<Duration> {
    self.slept.lock().clone()
  }
}

impl Sleeper for RecordingSleeper {
  fn sleep(&self, duration: Duration, cancel: &CancelToken) -> Result<(), FlexError> {
    let mut slept = self.slept.lock();
    if self.cancel_after.map_or(false, |n| slept.len() >= n) {
      cancel.cancel();
    }
    if cancel.is_cancelled() {
      return Err(FlexError::Cancelled);
    }
    slept.push(duration);
    Ok(())
  }
}

struct CancelState {
  cancelled: Mutex<bool>,
  cond: Condvar,
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone)]
pub struct CancelToken {
  inner: Arc<CancelState>,
}

impl Default for CancelToken {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for CancelToken {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CancelToken").field("cancelled", &self.is_cancelled()).finish()
  }
}

impl CancelToken {
  pub fn new() -> Self {
    Self { inner: Arc::new(CancelState { cancelled: Mutex::new(false), cond: Condvar::new() }) }
  }

  pub fn cancel(&self) {
    let mut cancelled = self.inner.cancelled.lock();
    *cancelled = true;
    self.inner.cond.notify_all();
  }

  pub fn is_cancelled(&self) -> bool {
    *self.inner.cancelled.lock()
  }

  /// Block up to `timeout`. Returns true if the token was cancelled.
  ///
  /// A timeout too large to be represented as an `Instant` waits until
  /// cancellation.
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    let deadline = Instant::now().checked_add(timeout);
    let mut cancelled = self.inner.cancelled.lock();
    while !*cancelled {
      match deadline {
        Some(deadline) => {
          if self.inner.cond.wait_until(&mut cancelled, deadline).timed_out() {
            break;
          }
        }
        None => self.inner.cond.wait(&mut cancelled),
      }
    }
    *cancelled
  }

  /// Cancel this token from a background thread once `timeout` elapses.
  pub fn cancel_after(&self, timeout: Duration) -> thread::JoinHandle<()> {
    let token = self.clone();
    thread::spawn(move || {
      if !token.wait_timeout(timeout) {
        debug!("Deadline of {:?} reached, cancelling", timeout);
        token.cancel();
      }
    })
  }
}
