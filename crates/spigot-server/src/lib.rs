//! HTTP surface for spigot.
//!
//! Exposes an axum [`Router`] over one [`GrantOrchestrator`] per enabled
//! purpose. Routes for a purpose that is not configured are not mounted. The
//! read-only registry lookups are mounted alongside the allocation routes.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;

pub use config::{Mode, ServerConfig, WatchConfig};
pub use error::Error;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use spigot_core::ledger::RegistryReader;
use spigot_engine::{Backend, GrantOrchestrator};
use tower_http::trace::TraceLayer;

use auth::AuthConfig;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<B: Backend> {
  pub allocation: Option<Arc<GrantOrchestrator<B>>>,
  pub faucet:     Option<Arc<GrantOrchestrator<B>>>,
  pub ledger:     Arc<B::Ledger>,
  pub auth:       Arc<AuthConfig>,
}

impl<B: Backend> Clone for AppState<B> {
  fn clone(&self) -> Self {
    Self {
      allocation: self.allocation.clone(),
      faucet:     self.faucet.clone(),
      ledger:     self.ledger.clone(),
      auth:       self.auth.clone(),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

pub fn router<B: Backend>(state: AppState<B>) -> Router
where
  B::Ledger: RegistryReader,
{
  let mut app = Router::new()
    .route("/",        get(handlers::pong))
    .route("/healthz", get(handlers::pong))
    .route("/ping",    get(handlers::pong));

  if state.allocation.is_some() {
    app = app
      .route("/verify/{target}",         post(handlers::verify::<B>))
      .route(
        "/verify/counter/{secret}",
        get(handlers::read_counter::<B>).put(handlers::reset_counter::<B>),
      )
      .route("/max-allowance/{target}",  get(handlers::max_allowance::<B>))
      .route("/account-remaining-bytes/{target}",  get(handlers::account_remaining_bytes::<B>))
      .route("/verifier-remaining-bytes/{target}", get(handlers::verifier_remaining_bytes::<B>))
      .route("/verifiers",        get(handlers::verifiers::<B>))
      .route("/verified-clients", get(handlers::verified_clients::<B>));
  }
  if state.faucet.is_some() {
    app = app.route("/faucet/{target}", post(handlers::faucet::<B>));
  }

  app.layer(TraceLayer::new_for_http()).with_state(state)
}
