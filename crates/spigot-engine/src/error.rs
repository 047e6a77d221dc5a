//! Error type for `spigot-engine`.

use std::time::Duration;

use spigot_core::eligibility::Rejection;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  /// The policy refused the grant. Shown to the caller as-is.
  #[error(transparent)]
  Rejected(#[from] Rejection),

  #[error("invalid target address: {0}")]
  InvalidTarget(#[source] spigot_core::Error),

  #[error("store error: {0}")]
  Store(#[source] BoxError),

  #[error("ledger error: {0}")]
  Ledger(#[source] BoxError),

  #[error("reputation lookup failed: {0}")]
  Reputation(#[source] BoxError),

  #[error("submission timed out after {0:?}")]
  Timeout(Duration),
}

impl Error {
  pub(crate) fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  pub(crate) fn ledger(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Ledger(Box::new(e))
  }

  pub(crate) fn reputation(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Reputation(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
