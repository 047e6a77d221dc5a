//! Core types, collaborator traits and grant policy for spigot.
//!
//! No HTTP, database or runtime dependencies live here. Everything in [`eligibility`] and [`allowance`] is a pure
//! function of its inputs; the collaborator traits in [`store`], [`ledger`],
//! [`counter`] and [`reputation`] are implemented by the backend crates.

// Trait methods spell out `+ Send` on their returned futures.
#![allow(async_fn_in_trait)]

pub mod address;
pub mod allowance;
pub mod amount;
pub mod blocklist;
pub mod counter;
pub mod eligibility;
pub mod error;
pub mod ledger;
pub mod reputation;
pub mod store;
pub mod subject;

pub use error::{Error, Result};
