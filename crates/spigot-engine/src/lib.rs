//! The grant engine: per-subject locking, the request-time grant flow and
//! the background reconciliation that commits or releases each lock.
//!
//! Everything here is generic over a [`Backend`], which names the concrete
//! collaborator implementations (store, ledger, reputation source, counter).

mod error;
mod lock;
mod orchestrator;
mod reconciler;

pub use error::{Error, Result};
pub use lock::{Acquisition, LockManager};
pub use orchestrator::{GrantOrchestrator, GrantPolicy, GrantReceipt};
pub use reconciler::{Reconciler, Reconciliation, SweepReport, WatchSettings};

use spigot_core::{
  counter::GlobalCounter, ledger::LedgerClient, reputation::ReputationSource,
  store::SubjectStore,
};

/// The set of collaborator types one deployment runs with.
pub trait Backend: Send + Sync + 'static {
  type Store: SubjectStore + 'static;
  type Ledger: LedgerClient + 'static;
  type Reputation: ReputationSource + 'static;
  type Counter: GlobalCounter + 'static;
}
