//! Error types for `spigot-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid ledger address {input:?}: {reason}")]
  InvalidAddress { input: String, reason: &'static str },

  #[error("invalid token amount {0:?}")]
  InvalidAmount(String),

  #[error("blocklist line {line}: {source}")]
  Blocklist {
    line:   usize,
    #[source]
    source: Box<Error>,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
