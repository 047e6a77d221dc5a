//! External reputation signals consumed by the allowance calculator.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{address::Address, subject::LinkedAccount};

/// Public activity timestamps for a linked account, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityHistory {
  pub events:    Vec<DateTime<Utc>>,
  /// The feed stopped at its maximum size; older events may exist.
  pub truncated: bool,
}

impl ActivityHistory {
  pub fn oldest(&self) -> Option<DateTime<Utc>> { self.events.iter().min().copied() }
}

pub trait ReputationSource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn activity<'a>(
    &'a self,
    account: &'a LinkedAccount,
  ) -> impl Future<Output = Result<ActivityHistory, Self::Error>> + Send + 'a;

  /// Number of verified deals the target address has made.
  fn verified_deal_count<'a>(
    &'a self,
    target: &'a Address,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;
}
