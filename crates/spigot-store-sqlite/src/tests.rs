//! Integration tests for `SqliteStore` against an in-memory database.

use std::sync::Arc;

use chrono::{Duration, Utc};
use spigot_core::{
  address::Address,
  amount::TokenAmount,
  counter::GlobalCounter,
  store::{LockWrite, SubjectQuery, SubjectStore},
  subject::{LinkedAccount, OperationHandle, PendingOperation, Purpose, Subject},
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn subject(github_id: &str) -> Subject {
  Subject::new(Uuid::new_v4()).with_account("github", LinkedAccount {
    unique_id:  github_id.into(),
    username:   format!("user{github_id}"),
    name:       "Test User".into(),
    created_at: Utc::now() - Duration::days(400),
  })
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn put_and_get_round_trips_history() {
  let s = store().await;
  let mut subj = subject("1");
  let grant = subj.grant_mut(Purpose::Faucet);
  grant.most_recent_grant = Some(Utc::now());
  grant.received_one_time = true;
  grant.pending = Some(PendingOperation {
    handle:       OperationHandle("bafy2bzacea".into()),
    purpose:      Purpose::Faucet,
    submitted_at: Utc::now(),
    target:       Address::parse("f01234").unwrap(),
    amount:       TokenAmount::new(5),
    one_time:     true,
  });

  s.put(subj.clone()).await.unwrap();
  let fetched = s.get(subj.subject_id).await.unwrap().unwrap();
  assert_eq!(fetched, subj);
}

#[tokio::test]
async fn get_missing_returns_none() {
  let s = store().await;
  assert!(s.get(Uuid::new_v4()).await.unwrap().is_none());
}

fn pending(handle: &str) -> PendingOperation {
  PendingOperation {
    handle:       OperationHandle(handle.into()),
    purpose:      Purpose::Allocation,
    submitted_at: Utc::now(),
    target:       Address::parse("f01234").unwrap(),
    amount:       TokenAmount::new(5),
    one_time:     false,
  }
}

#[tokio::test]
async fn put_leaves_lock_rows_unchanged() {
  let s = store().await;
  let subj = subject("1");
  s.put(subj.clone()).await.unwrap();
  let id = subj.subject_id;
  s.set_lock(id, Purpose::Faucet, false, true).await.unwrap();

  // A snapshot taken before the faucet lock was acquired.
  let mut stale = subj.clone();
  stale.grant_mut(Purpose::Allocation).locked = true;
  s.put(stale).await.unwrap();

  let fetched = s.get(id).await.unwrap().unwrap();
  assert!(fetched.is_locked(Purpose::Faucet));
  assert!(!fetched.is_locked(Purpose::Allocation));
}

#[tokio::test]
async fn put_skips_grant_state_under_a_held_lock() {
  let s = store().await;
  let subj = subject("1");
  s.put(subj.clone()).await.unwrap();
  let id = subj.subject_id;

  s.set_lock(id, Purpose::Faucet, false, true).await.unwrap();
  let mut grant = s.get(id).await.unwrap().unwrap().grant(Purpose::Faucet);
  grant.pending = Some(pending("bafy-faucet"));
  s.update_grant(id, Purpose::Faucet, None, &grant).await.unwrap();

  let mut stale = subj.clone();
  stale.grant_mut(Purpose::Faucet).received_one_time = true;
  stale.grant_mut(Purpose::Allocation).received_one_time = true;
  s.put(stale).await.unwrap();

  let fetched = s.get(id).await.unwrap().unwrap();
  let faucet = fetched.grant(Purpose::Faucet);
  assert_eq!(faucet.pending.map(|p| p.handle), Some(OperationHandle("bafy-faucet".into())));
  assert!(!faucet.received_one_time);
  assert!(fetched.grant(Purpose::Allocation).received_one_time);
}

// ─── Conditional grant update ────────────────────────────────────────────────

#[tokio::test]
async fn update_grant_requires_held_lock() {
  let s = store().await;
  let subj = subject("1");
  s.put(subj.clone()).await.unwrap();

  let mut grant = subj.grant(Purpose::Allocation);
  grant.locked = true;
  grant.pending = Some(pending("bafy1"));
  let write = s.update_grant(subj.subject_id, Purpose::Allocation, None, &grant).await.unwrap();
  assert_eq!(write, LockWrite::ConditionFailed);

  let fetched = s.get(subj.subject_id).await.unwrap().unwrap();
  assert!(!fetched.is_locked(Purpose::Allocation));
  assert!(fetched.grant(Purpose::Allocation).pending.is_none());
}

#[tokio::test]
async fn update_grant_records_then_settles_pending() {
  let s = store().await;
  let subj = subject("1");
  s.put(subj.clone()).await.unwrap();
  let id = subj.subject_id;
  s.set_lock(id, Purpose::Allocation, false, true).await.unwrap();

  let mut grant = subj.grant(Purpose::Allocation);
  grant.locked = true;
  grant.pending = Some(pending("bafy1"));
  assert_eq!(
    s.update_grant(id, Purpose::Allocation, None, &grant).await.unwrap(),
    LockWrite::Applied
  );

  let handle = OperationHandle("bafy1".into());
  grant.locked = false;
  grant.pending = None;
  grant.last_grant_height = Some(9);
  assert_eq!(
    s.update_grant(id, Purpose::Allocation, Some(&handle), &grant).await.unwrap(),
    LockWrite::Applied
  );

  let fetched = s.get(id).await.unwrap().unwrap();
  assert!(!fetched.is_locked(Purpose::Allocation));
  assert_eq!(fetched.grant(Purpose::Allocation).last_grant_height, Some(9));

  // Settling the same operation again finds the lock released.
  assert_eq!(
    s.update_grant(id, Purpose::Allocation, Some(&handle), &grant).await.unwrap(),
    LockWrite::ConditionFailed
  );
}

#[tokio::test]
async fn update_grant_rejects_mismatched_pending_handle() {
  let s = store().await;
  let subj = subject("1");
  s.put(subj.clone()).await.unwrap();
  let id = subj.subject_id;
  s.set_lock(id, Purpose::Allocation, false, true).await.unwrap();

  let mut grant = subj.grant(Purpose::Allocation);
  grant.locked = true;
  grant.pending = Some(pending("bafy2"));
  s.update_grant(id, Purpose::Allocation, None, &grant).await.unwrap();

  let settled = subj.grant(Purpose::Allocation);
  let old = OperationHandle("bafy1".into());
  assert_eq!(
    s.update_grant(id, Purpose::Allocation, Some(&old), &settled).await.unwrap(),
    LockWrite::ConditionFailed
  );

  let fetched = s.get(id).await.unwrap().unwrap();
  assert!(fetched.is_locked(Purpose::Allocation));
  assert_eq!(
    fetched.grant(Purpose::Allocation).pending.map(|p| p.handle),
    Some(OperationHandle("bafy2".into()))
  );
}

#[tokio::test]
async fn update_grant_on_missing_subject_errors() {
  let s = store().await;
  let err = s
    .update_grant(Uuid::new_v4(), Purpose::Faucet, None, &Default::default())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::SubjectNotFound(_)));
}

// ─── Conditional lock ────────────────────────────────────────────────────────

#[tokio::test]
async fn absent_lock_reads_as_unlocked() {
  let s = store().await;
  let subj = subject("1");
  s.put(subj.clone()).await.unwrap();

  let held = s.set_lock(subj.subject_id, Purpose::Faucet, true, false).await.unwrap();
  assert_eq!(held, LockWrite::ConditionFailed);

  let acquired = s.set_lock(subj.subject_id, Purpose::Faucet, false, true).await.unwrap();
  assert_eq!(acquired, LockWrite::Applied);
  assert!(s.get(subj.subject_id).await.unwrap().unwrap().is_locked(Purpose::Faucet));
}

#[tokio::test]
async fn second_acquire_fails_until_release() {
  let s = store().await;
  let subj = subject("1");
  s.put(subj.clone()).await.unwrap();
  let id = subj.subject_id;

  assert_eq!(s.set_lock(id, Purpose::Allocation, false, true).await.unwrap(), LockWrite::Applied);
  assert_eq!(
    s.set_lock(id, Purpose::Allocation, false, true).await.unwrap(),
    LockWrite::ConditionFailed
  );
  assert_eq!(s.set_lock(id, Purpose::Allocation, true, false).await.unwrap(), LockWrite::Applied);
  assert_eq!(s.set_lock(id, Purpose::Allocation, false, true).await.unwrap(), LockWrite::Applied);
}

#[tokio::test]
async fn purposes_lock_independently() {
  let s = store().await;
  let subj = subject("1");
  s.put(subj.clone()).await.unwrap();
  let id = subj.subject_id;

  s.set_lock(id, Purpose::Allocation, false, true).await.unwrap();
  assert_eq!(s.set_lock(id, Purpose::Faucet, false, true).await.unwrap(), LockWrite::Applied);
}

#[tokio::test]
async fn set_lock_on_missing_subject_errors() {
  let s = store().await;
  let err = s.set_lock(Uuid::new_v4(), Purpose::Faucet, false, true).await.unwrap_err();
  assert!(matches!(err, Error::SubjectNotFound(_)));
}

#[tokio::test]
async fn concurrent_acquire_has_one_winner() {
  let s = Arc::new(store().await);
  let subj = subject("1");
  s.put(subj.clone()).await.unwrap();

  let attempts = (0..16).map(|_| {
    let s = s.clone();
    let id = subj.subject_id;
    tokio::spawn(async move { s.set_lock(id, Purpose::Allocation, false, true).await.unwrap() })
  });

  let mut applied = 0;
  for attempt in attempts.collect::<Vec<_>>() {
    if attempt.await.unwrap() == LockWrite::Applied {
      applied += 1;
    }
  }
  assert_eq!(applied, 1);
}

// ─── Scan ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn scan_finds_locked_subjects() {
  let s = store().await;
  let a = subject("1");
  let b = subject("2");
  s.put(a.clone()).await.unwrap();
  s.put(b.clone()).await.unwrap();
  s.set_lock(b.subject_id, Purpose::Faucet, false, true).await.unwrap();

  let locked = s.scan(&SubjectQuery::locked(Purpose::Faucet)).await.unwrap();
  assert_eq!(locked.len(), 1);
  assert_eq!(locked[0].subject_id, b.subject_id);

  let none = s.scan(&SubjectQuery::locked(Purpose::Allocation)).await.unwrap();
  assert!(none.is_empty());
}

#[tokio::test]
async fn scan_by_linked_account() {
  let s = store().await;
  let a = subject("1");
  s.put(a.clone()).await.unwrap();
  s.put(subject("2")).await.unwrap();

  let found = s.scan(&SubjectQuery::linked_account("github", "1")).await.unwrap();
  assert_eq!(found.len(), 1);
  assert_eq!(found[0].subject_id, a.subject_id);

  let missing = s.scan(&SubjectQuery::linked_account("gitlab", "1")).await.unwrap();
  assert!(missing.is_empty());
}

#[tokio::test]
async fn scan_without_filters_returns_everything() {
  let s = store().await;
  for i in 0..3 {
    s.put(subject(&i.to_string())).await.unwrap();
  }
  assert_eq!(s.scan(&SubjectQuery::default()).await.unwrap().len(), 3);
}

// ─── Counter ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn counter_starts_at_zero() {
  let s = store().await;
  let c = s.counter("allocation");
  assert_eq!(c.get().await.unwrap(), 0);
  c.ensure().await.unwrap();
  assert_eq!(c.get().await.unwrap(), 0);
}

#[tokio::test]
async fn counter_increments_and_resets() {
  let s = store().await;
  let c = s.counter("allocation");
  assert_eq!(c.increment().await.unwrap(), 1);
  assert_eq!(c.increment().await.unwrap(), 2);
  assert_eq!(c.get().await.unwrap(), 2);

  c.reset().await.unwrap();
  assert_eq!(c.get().await.unwrap(), 0);
}

#[tokio::test]
async fn counters_are_independent() {
  let s = store().await;
  s.counter("a").increment().await.unwrap();
  assert_eq!(s.counter("b").get().await.unwrap(), 0);
}
