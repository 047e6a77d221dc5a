//! Error type for `spigot-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("unknown purpose column value: {0:?}")]
  UnknownPurpose(String),

  #[error("subject not found: {0}")]
  SubjectNotFound(uuid::Uuid),

  #[error("counter {name:?} holds an invalid value {value}")]
  InvalidCounter { name: String, value: i64 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
