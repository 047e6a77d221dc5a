//! Route handlers. Each is generic over the [`Backend`] the server runs
//! with.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use serde_json::{Value, json};
use spigot_core::{
  address::Address,
  counter::GlobalCounter,
  ledger::{DataCapEntry, RegistryReader},
};
use spigot_engine::{Backend, GrantOrchestrator, GrantReceipt};

use crate::{
  AppState,
  auth::{Caller, verify_admin_secret},
  error::Error,
};

fn enabled<B: Backend>(
  orchestrator: &Option<Arc<GrantOrchestrator<B>>>,
) -> Result<&GrantOrchestrator<B>, Error> {
  orchestrator.as_deref().ok_or(Error::NotFound)
}

fn counter_error(e: impl std::error::Error + Send + Sync + 'static) -> Error {
  Error::Counter(Box::new(e))
}

fn registry_error(e: impl std::error::Error + Send + Sync + 'static) -> Error {
  Error::Registry(Box::new(e))
}

pub async fn pong() -> Json<&'static str> { Json("pong") }

/// `POST /verify/{target}`
pub async fn verify<B: Backend>(
  State(state): State<AppState<B>>,
  caller: Caller,
  Path(target): Path<String>,
) -> Result<Json<GrantReceipt>, Error> {
  let receipt = enabled(&state.allocation)?.request(caller.subject_id, &target).await?;
  Ok(Json(receipt))
}

/// `POST /faucet/{target}`
pub async fn faucet<B: Backend>(
  State(state): State<AppState<B>>,
  caller: Caller,
  Path(target): Path<String>,
) -> Result<Json<GrantReceipt>, Error> {
  let receipt = enabled(&state.faucet)?.request(caller.subject_id, &target).await?;
  Ok(Json(receipt))
}

/// `GET /max-allowance/{target}`
pub async fn max_allowance<B: Backend>(
  State(state): State<AppState<B>>,
  caller: Caller,
  Path(target): Path<String>,
) -> Result<Json<Value>, Error> {
  let amount = enabled(&state.allocation)?.max_allowance(caller.subject_id, &target).await?;
  Ok(Json(json!({ "maxAllowance": amount })))
}

/// `GET /verify/counter/{secret}`
pub async fn read_counter<B: Backend>(
  State(state): State<AppState<B>>,
  Path(secret): Path<String>,
) -> Result<Json<Value>, Error> {
  verify_admin_secret(&secret, &state.auth)?;
  let counter = enabled(&state.allocation)?.counter().ok_or(Error::NotFound)?;
  let count = counter.get().await.map_err(counter_error)?;
  Ok(Json(json!({ "count": count })))
}

/// `PUT /verify/counter/{secret}`
pub async fn reset_counter<B: Backend>(
  State(state): State<AppState<B>>,
  Path(secret): Path<String>,
) -> Result<StatusCode, Error> {
  verify_admin_secret(&secret, &state.auth)?;
  let counter = enabled(&state.allocation)?.counter().ok_or(Error::NotFound)?;
  counter.reset().await.map_err(counter_error)?;
  tracing::info!("grant counter reset");
  Ok(StatusCode::ACCEPTED)
}

// ─── Registry reads ──────────────────────────────────────────────────────────

/// `GET /account-remaining-bytes/{target}`
pub async fn account_remaining_bytes<B: Backend>(
  State(state): State<AppState<B>>,
  Path(target): Path<String>,
) -> Result<Json<Value>, Error>
where
  B::Ledger: RegistryReader,
{
  let target = Address::parse(&target)?;
  let remaining = state
    .ledger
    .client_data_cap(&target)
    .await
    .map_err(registry_error)?
    .ok_or(Error::NotFound)?;
  Ok(Json(json!({ "remainingBytes": remaining })))
}

/// `GET /verifier-remaining-bytes/{target}`
pub async fn verifier_remaining_bytes<B: Backend>(
  State(state): State<AppState<B>>,
  Path(target): Path<String>,
) -> Result<Json<Value>, Error>
where
  B::Ledger: RegistryReader,
{
  let target = Address::parse(&target)?;
  let remaining = state
    .ledger
    .verifier_data_cap(&target)
    .await
    .map_err(registry_error)?
    .ok_or(Error::NotFound)?;
  Ok(Json(json!({ "remainingBytes": remaining })))
}

/// `GET /verifiers`
pub async fn verifiers<B: Backend>(
  State(state): State<AppState<B>>,
) -> Result<Json<Vec<DataCapEntry>>, Error>
where
  B::Ledger: RegistryReader,
{
  Ok(Json(state.ledger.verifiers().await.map_err(registry_error)?))
}

/// `GET /verified-clients`
pub async fn verified_clients<B: Backend>(
  State(state): State<AppState<B>>,
) -> Result<Json<Vec<DataCapEntry>>, Error>
where
  B::Ledger: RegistryReader,
{
  Ok(Json(state.ledger.verified_clients().await.map_err(registry_error)?))
}
