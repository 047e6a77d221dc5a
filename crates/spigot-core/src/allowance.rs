//! Grant sizing.
//!
//! Two strategies, chosen per purpose in configuration:
//!
//! - [`ReputationSizing`] scores the subject's public activity and the
//!   target's verified-deal history.
//! - [`PowerGrowthSizing`] sizes repeat grants to storage operators by how
//!   much power they gained since the previous grant.
//!
//! Everything here is a pure function of its inputs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{amount::TokenAmount, reputation::ActivityHistory};

const GIB: u128 = 1 << 30;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Sizing {
  Reputation(ReputationSizing),
  PowerGrowth(PowerGrowthSizing),
}

/// What to do with a month the activity feed could not see into because it
/// was cut off at its page limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationRule {
  /// Count the month as active.
  #[default]
  BenefitOfDoubt,
  /// Count the month as inactive.
  Strict,
}

fn default_activity_months() -> u32 { 3 }
fn default_month_days() -> u32 { 32 }
fn default_low_tier() -> u64 { 10 }
fn default_high_tier() -> u64 { 100 }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationSizing {
  pub base_amount:     TokenAmount,
  #[serde(default = "default_activity_months")]
  pub activity_months: u32,
  #[serde(default = "default_month_days")]
  pub month_days:      u32,
  #[serde(default)]
  pub truncation:      TruncationRule,
  #[serde(default = "default_low_tier")]
  pub low_tier:        u64,
  #[serde(default = "default_high_tier")]
  pub high_tier:       u64,
}

impl ReputationSizing {
  pub fn new(base_amount: TokenAmount) -> Self {
    Self {
      base_amount,
      activity_months: default_activity_months(),
      month_days: default_month_days(),
      truncation: TruncationRule::default(),
      low_tier: default_low_tier(),
      high_tier: default_high_tier(),
    }
  }
}

fn default_whole_unit() -> TokenAmount { TokenAmount::new(1_000_000_000_000_000_000) }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerGrowthSizing {
  /// Amount for a first grant or a grant to a new target.
  pub base_amount: TokenAmount,
  /// Floor for repeat grants.
  pub min_amount:  TokenAmount,
  /// Atomic units in one whole token.
  #[serde(default = "default_whole_unit")]
  pub whole_unit:  TokenAmount,
}

// ─── Reputation scoring ──────────────────────────────────────────────────────

/// True if every one of the trailing `months` buckets holds at least one
/// event. Bucket `k` (1-based) is `(now - k·len, now - (k-1)·len]`.
///
/// A bucket with no events is ambiguous when the feed was truncated and
/// its oldest event is newer than the start of that bucket; `rule` decides
/// those.
pub fn has_activity_in_each_month(
  history: &ActivityHistory,
  now: DateTime<Utc>,
  months: u32,
  month_len: Duration,
  rule: TruncationRule,
) -> bool {
  let oldest = history.oldest();
  (1..=i32::try_from(months).unwrap_or(i32::MAX)).all(|k| {
    let end = now - month_len * (k - 1);
    let start = now - month_len * k;
    if history.events.iter().any(|t| *t > start && *t <= end) {
      return true;
    }
    let unseen = history.truncated && oldest.is_none_or(|o| o > start);
    unseen && rule == TruncationRule::BenefitOfDoubt
  })
}

/// ×1 for no deals, ×2 up to `low`, ×4 up to `high`, ×8 beyond.
pub fn deal_multiplier(deal_count: u64, low: u64, high: u64) -> u64 {
  match deal_count {
    0 => 1,
    n if n <= low => 2,
    n if n <= high => 4,
    _ => 8,
  }
}

pub fn reputation_allowance(
  sizing: &ReputationSizing,
  history: &ActivityHistory,
  deal_count: u64,
  now: DateTime<Utc>,
) -> TokenAmount {
  let active = has_activity_in_each_month(
    history,
    now,
    sizing.activity_months,
    Duration::days(i64::from(sizing.month_days)),
    sizing.truncation,
  );
  let activity_factor = if active { 2 } else { 1 };
  sizing
    .base_amount
    .scaled(activity_factor)
    .scaled(deal_multiplier(deal_count, sizing.low_tier, sizing.high_tier))
}

// ─── Power-growth scoring ────────────────────────────────────────────────────

/// What the orchestrator learned about the target before sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthBasis {
  /// No previous grant to this target.
  FirstGrant,
  /// A repeat grant to an operator, with its power now and at the height
  /// of the previous grant.
  Repeat { power_now: u128, power_then: u128 },
}

pub fn power_growth_allowance(sizing: &PowerGrowthSizing, basis: GrowthBasis) -> TokenAmount {
  match basis {
    GrowthBasis::FirstGrant => sizing.base_amount,
    GrowthBasis::Repeat { power_now, power_then } => {
      let grown_gib = power_now.saturating_sub(power_then) / GIB;
      let amount = (grown_gib / 2).saturating_mul(sizing.whole_unit.value());
      TokenAmount::new(amount.max(sizing.min_amount.value()))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn history(now: DateTime<Utc>, days_ago: &[i64], truncated: bool) -> ActivityHistory {
    ActivityHistory {
      events: days_ago.iter().map(|d| now - Duration::days(*d)).collect(),
      truncated,
    }
  }

  fn covered(h: &ActivityHistory, now: DateTime<Utc>, rule: TruncationRule) -> bool {
    has_activity_in_each_month(h, now, 3, Duration::days(32), rule)
  }

  #[test]
  fn one_event_per_month_covers_window() {
    let now = Utc::now();
    assert!(covered(&history(now, &[10, 40, 95], false), now, TruncationRule::Strict));
  }

  #[test]
  fn missing_oldest_month_fails() {
    let now = Utc::now();
    assert!(!covered(&history(now, &[10, 40], false), now, TruncationRule::Strict));
  }

  #[test]
  fn truncated_feed_gets_benefit_of_doubt() {
    let now = Utc::now();
    let h = history(now, &[1, 2, 40], true);
    assert!(covered(&h, now, TruncationRule::BenefitOfDoubt));
    assert!(!covered(&h, now, TruncationRule::Strict));
  }

  #[test]
  fn truncation_does_not_excuse_a_gap_the_feed_covers() {
    let now = Utc::now();
    // The feed reaches past the middle month and nothing happened there.
    let h = history(now, &[1, 95], true);
    assert!(!covered(&h, now, TruncationRule::BenefitOfDoubt));
  }

  #[test]
  fn deal_tiers() {
    let tiers: Vec<u64> =
      [0, 1, 10, 11, 100, 101].iter().map(|n| deal_multiplier(*n, 10, 100)).collect();
    assert_eq!(tiers, vec![1, 2, 2, 4, 4, 8]);
  }

  #[test]
  fn reputation_combines_activity_and_deals() {
    let now = Utc::now();
    let sizing = ReputationSizing::new(TokenAmount::new(1 << 40));
    let active = history(now, &[10, 40, 95], false);
    let quiet = history(now, &[10], false);
    assert_eq!(reputation_allowance(&sizing, &quiet, 0, now), TokenAmount::new(1 << 40));
    assert_eq!(reputation_allowance(&sizing, &active, 0, now), TokenAmount::new(1 << 41));
    assert_eq!(reputation_allowance(&sizing, &active, 50, now), TokenAmount::new(1 << 43));
  }

  fn growth() -> PowerGrowthSizing {
    PowerGrowthSizing {
      base_amount: TokenAmount::new(100),
      min_amount:  TokenAmount::new(5),
      whole_unit:  TokenAmount::new(10),
    }
  }

  #[test]
  fn first_grant_is_base_amount() {
    assert_eq!(power_growth_allowance(&growth(), GrowthBasis::FirstGrant), TokenAmount::new(100));
  }

  #[test]
  fn repeat_grant_is_half_a_unit_per_gib() {
    let basis = GrowthBasis::Repeat { power_now: 12 * GIB, power_then: 2 * GIB };
    assert_eq!(power_growth_allowance(&growth(), basis), TokenAmount::new(50));
  }

  #[test]
  fn shrinking_power_yields_minimum() {
    let basis = GrowthBasis::Repeat { power_now: GIB, power_then: 4 * GIB };
    assert_eq!(power_growth_allowance(&growth(), basis), TokenAmount::new(5));
  }

  #[test]
  fn sizing_reads_tagged_config() {
    let sizing: Sizing = serde_json::from_value(serde_json::json!({
      "kind": "reputation",
      "base_amount": "1099511627776",
    }))
    .unwrap();
    let Sizing::Reputation(r) = sizing else { panic!("wrong variant") };
    assert_eq!(r.activity_months, 3);
    assert_eq!(r.truncation, TruncationRule::BenefitOfDoubt);
  }
}
