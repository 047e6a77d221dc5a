//! Per-subject, per-purpose mutual exclusion on top of the store's
//! conditional write. Holds no state of its own.

use std::sync::Arc;

use spigot_core::{
  store::{LockWrite, SubjectStore},
  subject::Purpose,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
  Acquired,
  /// Another grant for this subject and purpose is in flight.
  Held,
}

pub struct LockManager<S> {
  store: Arc<S>,
}

impl<S> Clone for LockManager<S> {
  fn clone(&self) -> Self { Self { store: self.store.clone() } }
}

impl<S: SubjectStore> LockManager<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// Set the lock iff it is currently unset.
  pub async fn acquire(&self, id: Uuid, purpose: Purpose) -> Result<Acquisition, S::Error> {
    Ok(match self.store.set_lock(id, purpose, false, true).await? {
      LockWrite::Applied => Acquisition::Acquired,
      LockWrite::ConditionFailed => Acquisition::Held,
    })
  }

  /// Clear the lock. Idempotent; returns whether it was held.
  pub async fn release(&self, id: Uuid, purpose: Purpose) -> Result<bool, S::Error> {
    Ok(self.store.set_lock(id, purpose, true, false).await? == LockWrite::Applied)
  }
}
