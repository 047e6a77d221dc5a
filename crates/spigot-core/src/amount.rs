//! Token amounts in the ledger's smallest unit.
//!
//! Amounts are serialised as decimal strings so they survive JSON consumers
//! that only have 53-bit integers. Deserialisation accepts either a string or
//! a plain integer, which keeps TOML configuration readable.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Error;

/// A non-negative quantity of the granted resource: data-cap bytes for
/// allocations, attoFIL for faucet transfers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub u128);

impl TokenAmount {
  pub const ZERO: Self = Self(0);

  pub fn new(value: u128) -> Self { Self(value) }

  pub fn value(self) -> u128 { self.0 }

  pub fn is_zero(self) -> bool { self.0 == 0 }

  /// Multiply by a small factor, saturating at `u128::MAX`.
  pub fn scaled(self, factor: u64) -> Self {
    Self(self.0.saturating_mul(u128::from(factor)))
  }
}

impl fmt::Display for TokenAmount {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl FromStr for TokenAmount {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    trimmed
      .parse::<u128>()
      .map(Self)
      .map_err(|_| Error::InvalidAmount(s.to_owned()))
  }
}

impl Serialize for TokenAmount {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&self.0)
  }
}

impl<'de> Deserialize<'de> for TokenAmount {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
      Text(String),
      Number(u64),
    }

    match Raw::deserialize(deserializer)? {
      Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
      Raw::Number(n) => Ok(Self(u128::from(n))),
    }
  }
}
