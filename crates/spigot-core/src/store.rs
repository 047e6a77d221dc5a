//! The `SubjectStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `spigot-store-sqlite`).
//! The engine and the HTTP layer depend on this abstraction, not on any
//! concrete backend.
//!
//! Lock state is never cached in-process: every lock decision goes through
//! [`SubjectStore::set_lock`] or [`SubjectStore::update_grant`], whose
//! atomicity is what makes the lock hold across replicas.

use std::future::Future;

use uuid::Uuid;

use crate::subject::{GrantState, OperationHandle, Purpose, Subject};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`SubjectStore::scan`]. All set filters must match.
#[derive(Debug, Clone, Default)]
pub struct SubjectQuery {
  /// Only subjects currently holding the lock for this purpose.
  pub locked:         Option<Purpose>,
  /// Only the subject linked to this `(provider, unique_id)` account.
  pub linked_account: Option<(String, String)>,
  pub limit:          Option<usize>,
}

impl SubjectQuery {
  pub fn locked(purpose: Purpose) -> Self {
    Self { locked: Some(purpose), ..Default::default() }
  }

  pub fn linked_account(provider: impl Into<String>, unique_id: impl Into<String>) -> Self {
    Self {
      linked_account: Some((provider.into(), unique_id.into())),
      limit: Some(1),
      ..Default::default()
    }
  }
}

/// Result of a conditional lock write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWrite {
  /// The precondition held and the write took effect.
  Applied,
  /// The precondition did not hold; nothing was written.
  ConditionFailed,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the persisted subject records.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait SubjectStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Retrieve a subject by id. Returns `None` if not found.
  fn get(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Subject>, Self::Error>> + Send + '_;

  /// Write the record's linked accounts, and the grant state of every
  /// purpose whose lock is not currently held.
  ///
  /// Never writes lock flags. Grant state under a held lock belongs to the
  /// lock holder and changes only through [`SubjectStore::update_grant`].
  fn put(
    &self,
    subject: Subject,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Atomically set `lock[purpose]` to `desired` iff it currently equals
  /// `expected`. An absent flag reads as `false`.
  ///
  /// Returns an error if the subject does not exist.
  fn set_lock(
    &self,
    id: Uuid,
    purpose: Purpose,
    expected: bool,
    desired: bool,
  ) -> impl Future<Output = Result<LockWrite, Self::Error>> + Send + '_;

  /// Atomically replace the grant state for `purpose` and set its lock flag
  /// to `grant.locked`, iff the lock is currently held and the stored
  /// pending operation's handle equals `expected`.
  ///
  /// Returns an error if the subject does not exist.
  fn update_grant<'a>(
    &'a self,
    id: Uuid,
    purpose: Purpose,
    expected: Option<&'a OperationHandle>,
    grant: &'a GrantState,
  ) -> impl Future<Output = Result<LockWrite, Self::Error>> + Send + 'a;

  /// Return every subject matching `query`.
  fn scan<'a>(
    &'a self,
    query: &'a SubjectQuery,
  ) -> impl Future<Output = Result<Vec<Subject>, Self::Error>> + Send + 'a;
}
