//! Error type for `spigot-remote`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("{url} returned {status}")]
  Status { url: String, status: reqwest::StatusCode },

  #[error("{method} failed ({code}): {message}")]
  Rpc { method: &'static str, code: i64, message: String },

  #[error("unexpected response: {0}")]
  Decode(String),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("cbor error: {0}")]
  Cbor(#[from] serde_cbor::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
