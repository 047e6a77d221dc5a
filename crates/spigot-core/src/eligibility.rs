//! Eligibility policy: may this subject receive a grant of this purpose to
//! this target right now?
//!
//! [`evaluate`] is a pure function. It runs the checks in a fixed order and
//! stops at the first failure; the order matters because the caller sees
//! exactly one reason. In particular the lock check runs before the cooldown
//! check, so a subject with a grant in flight is told so rather than being
//! judged against history the in-flight grant has not yet written.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  address::Address,
  blocklist::Blocklist,
  counter::CapReading,
  subject::{Purpose, Subject},
};

// ─── Policy constants ────────────────────────────────────────────────────────

fn default_min_account_age_days() -> u32 { 180 }

/// Per-purpose eligibility constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityPolicy {
  /// The oldest linked account must be at least this old.
  #[serde(default = "default_min_account_age_days")]
  pub min_account_age_days: u32,
  /// Minimum time between confirmed grants. `None` disables the cooldown.
  #[serde(default)]
  pub cooldown_secs:        Option<u64>,
  /// A subject may only ever receive one confirmed grant of this purpose.
  #[serde(default)]
  pub one_time:             bool,
  /// Storage-operator targets are exempt from `one_time`; their repeat
  /// grants are sized by power growth instead.
  #[serde(default)]
  pub operator_repeat:      bool,
  /// Upper bound on the shared grant counter. `None` disables the cap.
  #[serde(default)]
  pub cap:                  Option<u64>,
}

impl Default for EligibilityPolicy {
  fn default() -> Self {
    Self {
      min_account_age_days: default_min_account_age_days(),
      cooldown_secs:        None,
      one_time:             false,
      operator_repeat:      false,
      cap:                  None,
    }
  }
}

impl EligibilityPolicy {
  pub fn min_account_age(&self) -> Duration { Duration::days(i64::from(self.min_account_age_days)) }

  pub fn cooldown(&self) -> Option<Duration> {
    self
      .cooldown_secs
      .map(|secs| Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)))
  }
}

// ─── Rejections ──────────────────────────────────────────────────────────────

/// Why a grant was refused. The `Display` text is shown to the end user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
  /// The subject has no linked account; the caller's session predates
  /// linking and must re-authenticate.
  #[error("your session is out of date; please sign in again")]
  StaleIdentity,

  #[error("your previous request is still being processed; please try again later")]
  AlreadyInFlight,

  #[error("this account has already received its one-time grant")]
  AlreadyGranted,

  #[error("your linked account is too new to receive a grant")]
  IdentityTooNew,

  #[error("you must wait until {until} before requesting again")]
  CooldownActive { until: DateTime<Utc> },

  #[error("this address has reached its maximum usage and is not eligible")]
  TargetBlocked,

  #[error("the grant budget is used up for now; please come back tomorrow")]
  CapReached,
}

// ─── Decision ────────────────────────────────────────────────────────────────

/// Everything one evaluation looked at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityRequest<'a> {
  pub subject:            &'a Subject,
  pub purpose:            Purpose,
  pub target:             &'a Address,
  pub now:                DateTime<Utc>,
  pub cap:                CapReading,
  /// Whether the target is a storage operator, as reported by the ledger.
  pub target_is_operator: bool,
}

/// The values the checks were computed from, kept for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyInputs {
  pub oldest_account_age_days: Option<i64>,
  pub cooldown_ends:           Option<DateTime<Utc>>,
  pub cap:                     CapReading,
  pub target_is_operator:      bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityDecision {
  pub allowed:       bool,
  pub reason:        Option<Rejection>,
  pub policy_inputs: PolicyInputs,
}

impl EligibilityDecision {
  pub fn into_result(self) -> Result<PolicyInputs, Rejection> {
    match self.reason {
      None => Ok(self.policy_inputs),
      Some(r) => Err(r),
    }
  }
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

/// Run every check in order, short-circuiting on the first failure.
pub fn evaluate(
  policy: &EligibilityPolicy,
  blocklist: &Blocklist,
  req: &EligibilityRequest<'_>,
) -> EligibilityDecision {
  let grant = req.subject.grant(req.purpose);
  let policy_inputs = PolicyInputs {
    oldest_account_age_days: req.subject.oldest_account_age(req.now).map(|d| d.num_days()),
    cooldown_ends:           cooldown_ends(policy, req.subject, req.purpose),
    cap:                     req.cap,
    target_is_operator:      req.target_is_operator,
  };

  let reason = run_checks(policy, blocklist, req, grant.locked).err();
  EligibilityDecision { allowed: reason.is_none(), reason, policy_inputs }
}

fn run_checks(
  policy: &EligibilityPolicy,
  blocklist: &Blocklist,
  req: &EligibilityRequest<'_>,
  locked: bool,
) -> Result<(), Rejection> {
  if req.subject.linked_accounts.is_empty() {
    return Err(Rejection::StaleIdentity);
  }
  if locked {
    return Err(Rejection::AlreadyInFlight);
  }
  check_one_time(policy, req.subject, req.purpose, req.target_is_operator)?;

  let old_enough = req
    .subject
    .oldest_account_age(req.now)
    .is_some_and(|age| age >= policy.min_account_age());
  if !old_enough {
    return Err(Rejection::IdentityTooNew);
  }

  check_cooldown(policy, req.subject, req.purpose, req.now)?;

  if blocklist.contains(req.target) {
    return Err(Rejection::TargetBlocked);
  }
  if req.cap.is_exhausted() {
    return Err(Rejection::CapReached);
  }
  Ok(())
}

/// The history-dependent checks, re-run against a record read after the
/// lock was acquired. A concurrent grant may have committed between the
/// first evaluation and the lock.
pub fn recheck_history(
  policy: &EligibilityPolicy,
  subject: &Subject,
  purpose: Purpose,
  target_is_operator: bool,
  now: DateTime<Utc>,
) -> Result<(), Rejection> {
  check_one_time(policy, subject, purpose, target_is_operator)?;
  check_cooldown(policy, subject, purpose, now)
}

fn check_one_time(
  policy: &EligibilityPolicy,
  subject: &Subject,
  purpose: Purpose,
  target_is_operator: bool,
) -> Result<(), Rejection> {
  let exempt = policy.operator_repeat && target_is_operator;
  if policy.one_time && !exempt && subject.grant(purpose).received_one_time {
    return Err(Rejection::AlreadyGranted);
  }
  Ok(())
}

fn check_cooldown(
  policy: &EligibilityPolicy,
  subject: &Subject,
  purpose: Purpose,
  now: DateTime<Utc>,
) -> Result<(), Rejection> {
  match cooldown_ends(policy, subject, purpose) {
    Some(until) if now < until => Err(Rejection::CooldownActive { until }),
    _ => Ok(()),
  }
}

fn cooldown_ends(
  policy: &EligibilityPolicy,
  subject: &Subject,
  purpose: Purpose,
) -> Option<DateTime<Utc>> {
  let last = subject.grant(purpose).most_recent_grant?;
  Some(last + policy.cooldown()?)
}

#[cfg(test)]
mod tests {
  use uuid::Uuid;

  use super::*;
  use crate::subject::LinkedAccount;

  const TARGET: &str = "f1abjxfbp274xpdqcpuaykwkfb43omjotacm2p3za";

  fn policy() -> EligibilityPolicy {
    EligibilityPolicy {
      min_account_age_days: 180,
      cooldown_secs:        Some(24 * 60 * 60),
      one_time:             false,
      operator_repeat:      false,
      cap:                  Some(10),
    }
  }

  fn subject(account_age_days: i64, now: DateTime<Utc>) -> Subject {
    Subject::new(Uuid::new_v4()).with_account("github", LinkedAccount {
      unique_id:  "1".into(),
      username:   "alice".into(),
      name:       "Alice".into(),
      created_at: now - Duration::days(account_age_days),
    })
  }

  fn decide(policy: &EligibilityPolicy, subject: &Subject, cap: CapReading) -> EligibilityDecision {
    let target = Address::parse(TARGET).unwrap();
    let req = EligibilityRequest {
      subject,
      purpose: Purpose::Allocation,
      target: &target,
      now: Utc::now(),
      cap,
      target_is_operator: false,
    };
    evaluate(policy, &Blocklist::empty(), &req)
  }

  fn counted(count: u64) -> CapReading { CapReading::Counted { count, cap: 10 } }

  #[test]
  fn old_account_without_history_is_allowed() {
    let s = subject(200, Utc::now());
    let decision = decide(&policy(), &s, counted(0));
    assert!(decision.allowed);
    assert_eq!(decision.policy_inputs.oldest_account_age_days, Some(200));
  }

  #[test]
  fn no_linked_account_is_stale_identity() {
    let s = Subject::new(Uuid::new_v4());
    let decision = decide(&policy(), &s, counted(0));
    assert_eq!(decision.reason, Some(Rejection::StaleIdentity));
  }

  #[test]
  fn lock_is_checked_before_cooldown() {
    let now = Utc::now();
    let mut s = subject(200, now);
    let grant = s.grant_mut(Purpose::Allocation);
    grant.locked = true;
    grant.most_recent_grant = Some(now - Duration::hours(1));
    let decision = decide(&policy(), &s, counted(0));
    assert_eq!(decision.reason, Some(Rejection::AlreadyInFlight));
  }

  #[test]
  fn young_account_is_rejected() {
    let s = subject(30, Utc::now());
    assert_eq!(decide(&policy(), &s, counted(0)).reason, Some(Rejection::IdentityTooNew));
  }

  #[test]
  fn any_old_enough_account_passes() {
    let now = Utc::now();
    let s = subject(30, now).with_account("gitlab", LinkedAccount {
      unique_id:  "2".into(),
      username:   "alice".into(),
      name:       "Alice".into(),
      created_at: now - Duration::days(365),
    });
    assert!(decide(&policy(), &s, counted(0)).allowed);
  }

  #[test]
  fn recent_grant_triggers_cooldown() {
    let now = Utc::now();
    let mut s = subject(200, now);
    s.grant_mut(Purpose::Allocation).most_recent_grant = Some(now - Duration::hours(2));
    let decision = decide(&policy(), &s, counted(0));
    assert!(matches!(decision.reason, Some(Rejection::CooldownActive { .. })));
  }

  #[test]
  fn expired_cooldown_passes() {
    let now = Utc::now();
    let mut s = subject(200, now);
    s.grant_mut(Purpose::Allocation).most_recent_grant = Some(now - Duration::days(2));
    assert!(decide(&policy(), &s, counted(0)).allowed);
  }

  #[test]
  fn one_time_purpose_rejects_repeat() {
    let mut p = policy();
    p.one_time = true;
    let mut s = subject(200, Utc::now());
    s.grant_mut(Purpose::Allocation).received_one_time = true;
    assert_eq!(decide(&p, &s, counted(0)).reason, Some(Rejection::AlreadyGranted));
  }

  #[test]
  fn operator_targets_may_repeat_one_time_purposes() {
    let mut p = policy();
    p.one_time = true;
    p.operator_repeat = true;
    let mut s = subject(200, Utc::now());
    s.grant_mut(Purpose::Allocation).received_one_time = true;
    assert!(recheck_history(&p, &s, Purpose::Allocation, true, Utc::now()).is_ok());
    assert_eq!(
      recheck_history(&p, &s, Purpose::Allocation, false, Utc::now()),
      Err(Rejection::AlreadyGranted)
    );
  }

  #[test]
  fn blocked_target_is_rejected() {
    let target = Address::parse(TARGET).unwrap();
    let blocklist: Blocklist = std::iter::once(target.clone()).collect();
    let s = subject(200, Utc::now());
    let req = EligibilityRequest {
      subject:            &s,
      purpose:            Purpose::Allocation,
      target:             &target,
      now:                Utc::now(),
      cap:                counted(0),
      target_is_operator: false,
    };
    assert_eq!(evaluate(&policy(), &blocklist, &req).reason, Some(Rejection::TargetBlocked));
  }

  #[test]
  fn cap_must_be_strictly_below_limit() {
    let s = subject(200, Utc::now());
    assert!(decide(&policy(), &s, counted(9)).allowed);
    assert_eq!(decide(&policy(), &s, counted(10)).reason, Some(Rejection::CapReached));
  }

  #[test]
  fn unreadable_counter_fails_closed() {
    let s = subject(200, Utc::now());
    let decision = decide(&policy(), &s, CapReading::Unavailable { cap: 10 });
    assert!(!decision.allowed);
    assert_eq!(decision.reason, Some(Rejection::CapReached));
  }
}
