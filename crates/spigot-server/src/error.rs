//! Error types and axum `IntoResponse` implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use spigot_core::eligibility::Rejection;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("missing or invalid bearer token")]
  Unauthorized,
  /// Bad admin secret.
  #[error("Not allowed")]
  Forbidden,
  #[error("not found")]
  NotFound,
  #[error(transparent)]
  InvalidAddress(#[from] spigot_core::Error),
  #[error(transparent)]
  Grant(#[from] spigot_engine::Error),
  #[error("registry lookup failed: {0}")]
  Registry(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("counter error: {0}")]
  Counter(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn status(&self) -> StatusCode {
    use spigot_engine::Error as E;
    match self {
      Error::Unauthorized => StatusCode::UNAUTHORIZED,
      Error::Forbidden => StatusCode::FORBIDDEN,
      Error::NotFound => StatusCode::NOT_FOUND,
      Error::InvalidAddress(_) => StatusCode::BAD_REQUEST,
      Error::Grant(E::Rejected(Rejection::AlreadyInFlight)) => StatusCode::CONFLICT,
      Error::Grant(E::Rejected(Rejection::CapReached)) => StatusCode::LOCKED,
      Error::Grant(E::Rejected(_)) => StatusCode::FORBIDDEN,
      Error::Grant(E::InvalidTarget(_)) => StatusCode::BAD_REQUEST,
      Error::Grant(E::Ledger(_) | E::Timeout(_)) | Error::Registry(_) => StatusCode::BAD_GATEWAY,
      Error::Grant(E::Store(_) | E::Reputation(_)) | Error::Counter(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(error = %self, "request failed");
    }
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}
