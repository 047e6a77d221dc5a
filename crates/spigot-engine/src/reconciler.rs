//! Background settlement of in-flight grants.
//!
//! For a locked subject the reconciler asks the ledger what became of the
//! pending operation and either commits the grant history and releases the
//! lock, releases it without history on failure, or leaves it for the next
//! pass. Commit and release are one conditional write keyed on the pending
//! handle the pass observed, so a pass that loses a race writes nothing.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Deserialize;
use spigot_core::{
  ledger::{LedgerClient, Outcome},
  store::{LockWrite, SubjectQuery, SubjectStore},
  subject::{PendingOperation, Purpose},
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{Backend, Error, Result};

/// What one reconciliation attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
  /// The subject is not locked for this purpose; nothing to do.
  NotLocked,
  /// The ledger has not settled the operation yet; still locked.
  Pending,
  /// Success observed; history written and lock released.
  Committed { height: i64 },
  /// Failure observed; lock released, history untouched.
  Released { reason: String },
  /// Locked, but no pending operation is known. Needs an operator.
  Unknown,
  /// Another pass settled the operation first; nothing written.
  Superseded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
  pub examined:  usize,
  pub committed: usize,
  pub released:  usize,
  pub pending:   usize,
  pub unknown:   usize,
  pub errors:    usize,
}

impl SweepReport {
  fn record(&mut self, r: &Reconciliation) {
    match r {
      Reconciliation::NotLocked | Reconciliation::Superseded => {}
      Reconciliation::Pending => self.pending += 1,
      Reconciliation::Committed { .. } => self.committed += 1,
      Reconciliation::Released { .. } => self.released += 1,
      Reconciliation::Unknown => self.unknown += 1,
    }
  }
}

fn default_poll_secs() -> u64 { 30 }
fn default_timeout_secs() -> u64 { 30 * 60 }

/// Settings for the per-request watch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WatchSettings {
  #[serde(default = "default_poll_secs")]
  pub poll_secs:    u64,
  /// After this long the watch gives up and leaves the lock for the sweep.
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for WatchSettings {
  fn default() -> Self {
    Self { poll_secs: default_poll_secs(), timeout_secs: default_timeout_secs() }
  }
}

// ─── Reconciler ──────────────────────────────────────────────────────────────

pub struct Reconciler<B: Backend> {
  store:  Arc<B::Store>,
  ledger: Arc<B::Ledger>,
}

impl<B: Backend> Clone for Reconciler<B> {
  fn clone(&self) -> Self { Self { store: self.store.clone(), ledger: self.ledger.clone() } }
}

impl<B: Backend> Reconciler<B> {
  pub fn new(store: Arc<B::Store>, ledger: Arc<B::Ledger>) -> Self { Self { store, ledger } }

  /// Settle one subject. `hint` is used when the record carries no pending
  /// operation, e.g. because persisting it failed after submission.
  pub async fn reconcile_subject(
    &self,
    id: Uuid,
    purpose: Purpose,
    hint: Option<&PendingOperation>,
  ) -> Result<Reconciliation> {
    let Some(subject) = self.store.get(id).await.map_err(Error::store)? else {
      warn!(subject = %id, %purpose, "reconcile: subject not found");
      return Ok(Reconciliation::Unknown);
    };
    if !subject.is_locked(purpose) {
      return Ok(Reconciliation::NotLocked);
    }

    let mut grant = subject.grant(purpose);
    let observed = grant.pending.as_ref().map(|p| p.handle.clone());
    let Some(pending) = grant.pending.clone().or_else(|| hint.cloned()) else {
      warn!(subject = %id, %purpose, "locked with no pending operation; needs manual release");
      return Ok(Reconciliation::Unknown);
    };

    let outcome = self.ledger.outcome(&pending.handle).await.map_err(Error::ledger)?;
    let settled = match outcome {
      Outcome::Pending => {
        debug!(subject = %id, %purpose, handle = %pending.handle, "still pending");
        return Ok(Reconciliation::Pending);
      }
      Outcome::Success { height } => {
        grant.most_recent_grant = Some(Utc::now());
        grant.received_one_time |= pending.one_time;
        grant.target_address = Some(pending.target.clone());
        grant.last_grant_height = Some(height);
        Reconciliation::Committed { height }
      }
      Outcome::Failure { reason } => Reconciliation::Released { reason },
    };
    grant.pending = None;
    grant.locked = false;

    let write = self
      .store
      .update_grant(id, purpose, observed.as_ref(), &grant)
      .await
      .map_err(Error::store)?;
    if write == LockWrite::ConditionFailed {
      debug!(subject = %id, %purpose, handle = %pending.handle, "already settled by another pass");
      return Ok(Reconciliation::Superseded);
    }

    match &settled {
      Reconciliation::Committed { height } => info!(
        subject = %id, %purpose, handle = %pending.handle,
        amount = %pending.amount, height, "grant committed"
      ),
      Reconciliation::Released { reason } => {
        warn!(subject = %id, %purpose, handle = %pending.handle, %reason, "grant failed on ledger")
      }
      _ => {}
    }
    Ok(settled)
  }

  /// Reconcile every subject currently locked for `purpose`.
  pub async fn sweep(&self, purpose: Purpose) -> Result<SweepReport> {
    let locked = self
      .store
      .scan(&SubjectQuery::locked(purpose))
      .await
      .map_err(Error::store)?;

    let mut report = SweepReport { examined: locked.len(), ..Default::default() };
    for subject in locked {
      match self.reconcile_subject(subject.subject_id, purpose, None).await {
        Ok(r) => report.record(&r),
        Err(e) => {
          warn!(subject = %subject.subject_id, %purpose, error = %e, "reconcile failed");
          report.errors += 1;
        }
      }
    }
    Ok(report)
  }

  /// Poll one operation until it settles or the deadline passes. On
  /// deadline the lock is left held for the periodic sweep, since the true
  /// outcome is still unknown.
  pub async fn watch(
    self,
    id: Uuid,
    purpose: Purpose,
    pending: PendingOperation,
    settings: WatchSettings,
  ) -> Reconciliation {
    let poll = Duration::from_secs(settings.poll_secs.max(1));
    let deadline = Duration::from_secs(settings.timeout_secs);

    let settle = async {
      loop {
        match self.reconcile_subject(id, purpose, Some(&pending)).await {
          Ok(Reconciliation::Pending) => {}
          Ok(r) => return r,
          Err(e) => warn!(subject = %id, %purpose, error = %e, "watch: reconcile failed"),
        }
        tokio::time::sleep(poll).await;
      }
    };

    match tokio::time::timeout(deadline, settle).await {
      Ok(r) => r,
      Err(_) => {
        warn!(
          subject = %id, %purpose, handle = %pending.handle,
          "watch deadline passed; leaving lock for the sweep"
        );
        Reconciliation::Pending
      }
    }
  }

  /// Sweep `purposes` every `every`, forever.
  pub async fn run_periodic(self, purposes: Vec<Purpose>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      for purpose in &purposes {
        match self.sweep(*purpose).await {
          Ok(report) if report.unknown > 0 || report.errors > 0 => {
            warn!(%purpose, ?report, "sweep finished with stuck subjects")
          }
          Ok(report) => info!(%purpose, ?report, "sweep finished"),
          Err(e) => error!(%purpose, error = %e, "sweep failed"),
        }
      }
    }
  }
}
