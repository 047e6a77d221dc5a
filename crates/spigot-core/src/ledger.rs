//! The `LedgerClient` trait: submission and outcome lookup of grant
//! operations on the external ledger.
//!
//! Message construction, gas estimation and signing live behind this trait.
//! `submit` returns as soon as the operation is accepted for inclusion; the
//! outcome is observed later through `outcome`.
//!
//! [`RegistryReader`] covers the read-only data-cap lookups served by the
//! HTTP layer.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{
  address::Address,
  amount::TokenAmount,
  subject::{OperationHandle, Purpose},
};

/// What to put on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationSpec {
  /// Register `client` as a verified client with `amount` bytes of data cap.
  Allocation { client: Address, amount: TokenAmount },
  /// Send `amount` of native funds to `to`.
  Transfer { to: Address, amount: TokenAmount },
}

impl OperationSpec {
  pub fn for_purpose(purpose: Purpose, target: Address, amount: TokenAmount) -> Self {
    match purpose {
      Purpose::Allocation => Self::Allocation { client: target, amount },
      Purpose::Faucet => Self::Transfer { to: target, amount },
    }
  }

  pub fn target(&self) -> &Address {
    match self {
      Self::Allocation { client, .. } => client,
      Self::Transfer { to, .. } => to,
    }
  }

  pub fn amount(&self) -> TokenAmount {
    match self {
      Self::Allocation { amount, .. } | Self::Transfer { amount, .. } => *amount,
    }
  }
}

/// The observed state of a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
  /// Not yet included, or included without enough confirmations.
  Pending,
  /// Included and executed successfully at `height`.
  Success { height: i64 },
  /// Included but execution failed, or the operation was dropped.
  Failure { reason: String },
}

impl Outcome {
  pub fn is_terminal(&self) -> bool { !matches!(self, Self::Pending) }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

pub trait LedgerClient: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Push the operation and return its handle without waiting for inclusion.
  fn submit<'a>(
    &'a self,
    spec: &'a OperationSpec,
  ) -> impl Future<Output = Result<OperationHandle, Self::Error>> + Send + 'a;

  /// Look up what happened to a previously submitted operation.
  fn outcome<'a>(
    &'a self,
    handle: &'a OperationHandle,
  ) -> impl Future<Output = Result<Outcome, Self::Error>> + Send + 'a;

  /// Raw-byte power held by `operator` at `at_height` (chain head when
  /// `None`). Returns `None` when the address is not a storage operator.
  fn operator_power<'a>(
    &'a self,
    operator: &'a Address,
    at_height: Option<i64>,
  ) -> impl Future<Output = Result<Option<u128>, Self::Error>> + Send + 'a;
}

// ─── Registry reads ──────────────────────────────────────────────────────────

/// An address and the data cap it currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCapEntry {
  pub address:  Address,
  pub data_cap: TokenAmount,
}

/// Read-only queries against the ledger's verified-data registry.
pub trait RegistryReader: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Remaining data cap of a verified client, or `None` if `client` is not
  /// one.
  fn client_data_cap<'a>(
    &'a self,
    client: &'a Address,
  ) -> impl Future<Output = Result<Option<TokenAmount>, Self::Error>> + Send + 'a;

  /// Remaining allowance of a verifier (notary), or `None` if `verifier` is
  /// not one.
  fn verifier_data_cap<'a>(
    &'a self,
    verifier: &'a Address,
  ) -> impl Future<Output = Result<Option<TokenAmount>, Self::Error>> + Send + 'a;

  fn verifiers(&self) -> impl Future<Output = Result<Vec<DataCapEntry>, Self::Error>> + Send + '_;

  fn verified_clients(
    &self,
  ) -> impl Future<Output = Result<Vec<DataCapEntry>, Self::Error>> + Send + '_;
}
