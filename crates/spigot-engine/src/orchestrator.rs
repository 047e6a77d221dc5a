//! The request-time grant flow.
//!
//! ```text
//! eligibility ─▶ acquire lock ─▶ re-read + recheck ─▶ size ─▶ submit
//!                                                              │
//!            respond ◀─ count ◀─ record pending ◀──────────────┘
//! ```
//!
//! The lock outlives the request only if submission succeeded; every exit
//! between acquiring it and a successful submit releases it. Settlement is
//! left to the [`Reconciler`].

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spigot_core::{
  address::Address,
  allowance::{power_growth_allowance, reputation_allowance, GrowthBasis, Sizing},
  amount::TokenAmount,
  blocklist::Blocklist,
  counter::{CapReading, GlobalCounter},
  eligibility::{
    evaluate, recheck_history, EligibilityDecision, EligibilityPolicy, EligibilityRequest,
    Rejection,
  },
  ledger::{LedgerClient, OperationSpec},
  reputation::{ActivityHistory, ReputationSource},
  store::{LockWrite, SubjectStore},
  subject::{GrantState, OperationHandle, PendingOperation, Purpose, Subject},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
  reconciler::WatchSettings, Acquisition, Backend, Error, LockManager, Reconciler, Result,
};

const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Eligibility and sizing for one purpose. The eligibility keys sit at the
/// top level of the purpose's config table, next to `sizing`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GrantPolicy {
  #[serde(flatten)]
  pub eligibility: EligibilityPolicy,
  pub sizing:      Sizing,
}

/// Returned to the caller once the operation is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantReceipt {
  pub operation_ref: OperationHandle,
  pub amount:        TokenAmount,
  pub target:        Address,
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

pub struct GrantOrchestrator<B: Backend> {
  purpose:        Purpose,
  policy:         GrantPolicy,
  blocklist:      Arc<Blocklist>,
  store:          Arc<B::Store>,
  ledger:         Arc<B::Ledger>,
  reputation:     Arc<B::Reputation>,
  counter:        Option<Arc<B::Counter>>,
  locks:          LockManager<B::Store>,
  submit_timeout: Duration,
  watch:          Option<WatchSettings>,
}

impl<B: Backend> GrantOrchestrator<B> {
  pub fn new(
    purpose: Purpose,
    policy: GrantPolicy,
    store: Arc<B::Store>,
    ledger: Arc<B::Ledger>,
    reputation: Arc<B::Reputation>,
  ) -> Self {
    Self {
      purpose,
      policy,
      blocklist: Arc::new(Blocklist::empty()),
      locks: LockManager::new(store.clone()),
      store,
      ledger,
      reputation,
      counter: None,
      submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
      watch: None,
    }
  }

  pub fn with_blocklist(mut self, blocklist: Arc<Blocklist>) -> Self {
    self.blocklist = blocklist;
    self
  }

  /// Gate grants on a shared counter. Only consulted when the policy sets
  /// a cap.
  pub fn with_counter(mut self, counter: Arc<B::Counter>) -> Self {
    self.counter = Some(counter);
    self
  }

  pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
    self.submit_timeout = timeout;
    self
  }

  /// Spawn a watch task after every successful submission.
  pub fn with_watch(mut self, settings: WatchSettings) -> Self {
    self.watch = Some(settings);
    self
  }

  pub fn purpose(&self) -> Purpose { self.purpose }

  pub fn policy(&self) -> &GrantPolicy { &self.policy }

  pub fn counter(&self) -> Option<&Arc<B::Counter>> { self.counter.as_ref() }

  // ── Request flow ──────────────────────────────────────────────────────────

  /// Run the full grant flow for `subject_id` towards `target`.
  pub async fn request(&self, subject_id: Uuid, target: &str) -> Result<GrantReceipt> {
    let target = Address::parse(target).map_err(Error::InvalidTarget)?;
    let now = Utc::now();
    let purpose = self.purpose;

    let subject = self.load(subject_id).await?;
    let cap = self.read_cap().await;

    // Operator status only ever lifts the one-time check, so every other
    // rejection is final before the ledger is asked.
    let mut decision = self.evaluate(&subject, &target, now, cap, false);
    let mut target_is_operator = false;
    if matches!(decision.reason, None | Some(Rejection::AlreadyGranted)) {
      target_is_operator = self.target_is_operator(&target).await?;
      if target_is_operator && decision.reason.is_some() {
        decision = self.evaluate(&subject, &target, now, cap, true);
      }
    }
    if let Some(reason) = decision.reason {
      debug!(subject = %subject_id, %purpose, inputs = ?decision.policy_inputs, %reason, "rejected");
      return Err(reason.into());
    }

    match self.locks.acquire(subject_id, purpose).await.map_err(Error::store)? {
      Acquisition::Acquired => {}
      Acquisition::Held => return Err(Rejection::AlreadyInFlight.into()),
    }

    match self.submit_locked(subject_id, &target, target_is_operator, now).await {
      Ok((grant, pending)) => Ok(self.after_submit(subject_id, grant, pending).await),
      Err(e) => {
        self.release_after_failure(subject_id).await;
        Err(e)
      }
    }
  }

  fn evaluate(
    &self,
    subject: &Subject,
    target: &Address,
    now: DateTime<Utc>,
    cap: CapReading,
    target_is_operator: bool,
  ) -> EligibilityDecision {
    evaluate(&self.policy.eligibility, &self.blocklist, &EligibilityRequest {
      subject,
      purpose: self.purpose,
      target,
      now,
      cap,
      target_is_operator,
    })
  }

  /// Everything between acquiring the lock and a successful submission.
  async fn submit_locked(
    &self,
    subject_id: Uuid,
    target: &Address,
    target_is_operator: bool,
    now: DateTime<Utc>,
  ) -> Result<(GrantState, PendingOperation)> {
    // Eligibility ran before the lock; a concurrent grant may have settled
    // since.
    let subject = self.load(subject_id).await?;
    recheck_history(&self.policy.eligibility, &subject, self.purpose, target_is_operator, now)?;

    let amount = self.size(&subject, target, target_is_operator, now).await?;
    let spec = OperationSpec::for_purpose(self.purpose, target.clone(), amount);

    let handle = tokio::time::timeout(self.submit_timeout, self.ledger.submit(&spec))
      .await
      .map_err(|_| Error::Timeout(self.submit_timeout))?
      .map_err(Error::ledger)?;

    let pending = PendingOperation {
      handle,
      purpose: self.purpose,
      submitted_at: Utc::now(),
      target: target.clone(),
      amount,
      one_time: self.policy.eligibility.one_time,
    };
    Ok((subject.grant(self.purpose), pending))
  }

  /// Record the pending operation, count the grant and hand off to the
  /// reconciler. Nothing here can fail the request: the operation is
  /// already on its way.
  async fn after_submit(
    &self,
    subject_id: Uuid,
    mut grant: GrantState,
    pending: PendingOperation,
  ) -> GrantReceipt {
    let purpose = self.purpose;
    info!(
      subject = %subject_id, %purpose, handle = %pending.handle,
      amount = %pending.amount, target = %pending.target, "grant submitted"
    );

    grant.locked = true;
    grant.pending = Some(pending.clone());
    match self.store.update_grant(subject_id, purpose, None, &grant).await {
      Ok(LockWrite::Applied) => {}
      Ok(LockWrite::ConditionFailed) => error!(
        subject = %subject_id, %purpose, handle = %pending.handle,
        "lock lost or pending operation already recorded; not overwriting"
      ),
      Err(e) => error!(
        subject = %subject_id, %purpose, handle = %pending.handle, error = %e,
        "failed to record pending operation; subject stays locked"
      ),
    }

    if let (Some(_), Some(counter)) = (self.policy.eligibility.cap, &self.counter) {
      if let Err(e) = counter.increment().await {
        warn!(%purpose, error = %e, "failed to increment grant counter");
      }
    }

    if let Some(settings) = self.watch {
      let reconciler = Reconciler::<B>::new(self.store.clone(), self.ledger.clone());
      tokio::spawn(reconciler.watch(subject_id, purpose, pending.clone(), settings));
    }

    GrantReceipt { operation_ref: pending.handle, amount: pending.amount, target: pending.target }
  }

  async fn release_after_failure(&self, subject_id: Uuid) {
    if let Err(e) = self.locks.release(subject_id, self.purpose).await {
      error!(
        subject = %subject_id, purpose = %self.purpose, error = %e,
        "failed to release lock after aborted grant"
      );
    }
  }

  /// The amount `subject_id` would receive right now, without locking or
  /// checking eligibility.
  pub async fn max_allowance(&self, subject_id: Uuid, target: &str) -> Result<TokenAmount> {
    let target = Address::parse(target).map_err(Error::InvalidTarget)?;
    let subject = self.load(subject_id).await?;
    let target_is_operator = self.target_is_operator(&target).await?;
    self.size(&subject, &target, target_is_operator, Utc::now()).await
  }

  // ── Helpers ───────────────────────────────────────────────────────────────

  /// A missing record means the caller's token predates linking.
  async fn load(&self, subject_id: Uuid) -> Result<Subject> {
    self
      .store
      .get(subject_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::Rejected(Rejection::StaleIdentity))
  }

  async fn target_is_operator(&self, target: &Address) -> Result<bool> {
    let relevant = matches!(self.policy.sizing, Sizing::PowerGrowth(_))
      || self.policy.eligibility.operator_repeat;
    if !relevant || !target.is_id() {
      return Ok(false);
    }
    let power = self.ledger.operator_power(target, None).await.map_err(Error::ledger)?;
    Ok(power.is_some())
  }

  async fn read_cap(&self) -> CapReading {
    let Some(cap) = self.policy.eligibility.cap else {
      return CapReading::Unlimited;
    };
    match &self.counter {
      Some(counter) => {
        let count = counter.get().await;
        if let Err(e) = &count {
          warn!(purpose = %self.purpose, error = %e, "grant counter unreadable; treating as exhausted");
        }
        CapReading::from_result(Some(cap), count)
      }
      None => CapReading::Unavailable { cap },
    }
  }

  async fn size(
    &self,
    subject: &Subject,
    target: &Address,
    target_is_operator: bool,
    now: DateTime<Utc>,
  ) -> Result<TokenAmount> {
    match &self.policy.sizing {
      Sizing::Reputation(sizing) => {
        let history = match subject.primary_account() {
          Some((_, account)) => {
            self.reputation.activity(account).await.map_err(Error::reputation)?
          }
          None => ActivityHistory::default(),
        };
        let deals = self
          .reputation
          .verified_deal_count(target)
          .await
          .map_err(Error::reputation)?;
        Ok(reputation_allowance(sizing, &history, deals, now))
      }
      Sizing::PowerGrowth(sizing) => {
        let grant = subject.grant(self.purpose);
        let basis = match (grant.target_address.as_ref(), grant.last_grant_height) {
          (Some(previous), Some(height)) if target_is_operator && previous == target => {
            let power_now = self.power(target, None).await?;
            let power_then = self.power(target, Some(height)).await?;
            GrowthBasis::Repeat { power_now, power_then }
          }
          _ => GrowthBasis::FirstGrant,
        };
        Ok(power_growth_allowance(sizing, basis))
      }
    }
  }

  async fn power(&self, operator: &Address, at_height: Option<i64>) -> Result<u128> {
    let power = self
      .ledger
      .operator_power(operator, at_height)
      .await
      .map_err(Error::ledger)?;
    Ok(power.unwrap_or(0))
  }
}
