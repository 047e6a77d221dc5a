//! The shared counter bounding the total number of grants.

use std::future::Future;

use serde::Serialize;

pub trait GlobalCounter: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn get(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Add one and return the new value.
  fn increment(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn reset(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

/// What the eligibility policy knows about the cap when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CapReading {
  /// No cap configured for this purpose.
  Unlimited,
  Counted { count: u64, cap: u64 },
  /// The counter could not be read. Treated as cap reached.
  Unavailable { cap: u64 },
}

impl CapReading {
  /// Build a reading from a counter result, failing closed on error.
  pub fn from_result<E>(cap: Option<u64>, count: Result<u64, E>) -> Self {
    match (cap, count) {
      (None, _) => Self::Unlimited,
      (Some(cap), Ok(count)) => Self::Counted { count, cap },
      (Some(cap), Err(_)) => Self::Unavailable { cap },
    }
  }

  /// True unless the counter was read and is strictly below the cap.
  pub fn is_exhausted(&self) -> bool {
    match *self {
      Self::Unlimited => false,
      Self::Counted { count, cap } => count >= cap,
      Self::Unavailable { .. } => true,
    }
  }
}
