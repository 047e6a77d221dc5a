//! Subject: one record per authenticated principal.
//!
//! A subject carries its linked external accounts and, per grant purpose,
//! the lock flag and grant history that the orchestrator and reconciler
//! maintain. Subjects are never deleted; cooldowns depend on their history.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::{address::Address, amount::TokenAmount};

// ─── Purpose ─────────────────────────────────────────────────────────────────

/// What a grant is for. Each purpose has its own lock and its own history,
/// so an in-flight faucet transfer never blocks a data-cap allocation.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumIter,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Purpose {
  /// Verified-client data-cap allocation.
  Allocation,
  /// Faucet transfer of native funds.
  Faucet,
}

// ─── Linked accounts ─────────────────────────────────────────────────────────

/// An external identity (e.g. a GitHub account) linked to the subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedAccount {
  /// Provider-assigned stable identifier.
  pub unique_id:  String,
  /// Login handle; used to query the provider's activity feed.
  pub username:   String,
  pub name:       String,
  /// When the account was created at the provider.
  pub created_at: DateTime<Utc>,
}

impl LinkedAccount {
  pub fn age(&self, now: DateTime<Utc>) -> Duration { now - self.created_at }
}

// ─── Pending operation ───────────────────────────────────────────────────────

/// Opaque reference to a submitted ledger operation (a message CID for
/// Lotus).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationHandle(pub String);

impl OperationHandle {
  pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for OperationHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// A submitted, not-yet-reconciled ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
  pub handle:       OperationHandle,
  pub purpose:      Purpose,
  pub submitted_at: DateTime<Utc>,
  pub target:       Address,
  pub amount:       TokenAmount,
  /// Whether a confirmed outcome consumes the subject's one-time grant.
  #[serde(default)]
  pub one_time:     bool,
}

// ─── Grant state ─────────────────────────────────────────────────────────────

/// Lock flag and grant history for one purpose.
///
/// `locked` and `pending` are provisional state written by the orchestrator;
/// every other field is terminal state written only by the reconciler after
/// the ledger confirms an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantState {
  /// A grant is in flight for this purpose.
  #[serde(default)]
  pub locked:            bool,
  /// Time of the last *confirmed* grant.
  pub most_recent_grant: Option<DateTime<Utc>>,
  pub pending:           Option<PendingOperation>,
  #[serde(default)]
  pub received_one_time: bool,
  /// Target of the last confirmed grant.
  pub target_address:    Option<Address>,
  /// Chain height at which the last confirmed grant landed.
  pub last_grant_height: Option<i64>,
}

// ─── Subject ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
  pub subject_id:      Uuid,
  /// Provider name (e.g. `"github"`) → linked account.
  #[serde(default)]
  pub linked_accounts: BTreeMap<String, LinkedAccount>,
  #[serde(default)]
  pub grants:          BTreeMap<Purpose, GrantState>,
}

impl Subject {
  /// A freshly linked subject: no locks held, no history.
  pub fn new(subject_id: Uuid) -> Self {
    Self {
      subject_id,
      linked_accounts: BTreeMap::new(),
      grants: BTreeMap::new(),
    }
  }

  pub fn with_account(mut self, provider: impl Into<String>, account: LinkedAccount) -> Self {
    self.linked_accounts.insert(provider.into(), account);
    self
  }

  /// Grant state for `purpose`; absent state reads as the default (unlocked,
  /// no history).
  pub fn grant(&self, purpose: Purpose) -> GrantState {
    self.grants.get(&purpose).cloned().unwrap_or_default()
  }

  pub fn grant_mut(&mut self, purpose: Purpose) -> &mut GrantState {
    self.grants.entry(purpose).or_default()
  }

  pub fn is_locked(&self, purpose: Purpose) -> bool {
    self.grants.get(&purpose).is_some_and(|g| g.locked)
  }

  /// Age of the oldest linked account, or `None` with no accounts linked.
  pub fn oldest_account_age(&self, now: DateTime<Utc>) -> Option<Duration> {
    self.linked_accounts.values().map(|a| a.age(now)).max()
  }

  /// The account whose activity feed scores reputation. Prefers GitHub, then
  /// the oldest linked account.
  pub fn primary_account(&self) -> Option<(&str, &LinkedAccount)> {
    if let Some((provider, account)) = self.linked_accounts.get_key_value("github") {
      return Some((provider.as_str(), account));
    }
    self
      .linked_accounts
      .iter()
      .min_by_key(|(_, a)| a.created_at)
      .map(|(p, a)| (p.as_str(), a))
  }
}
