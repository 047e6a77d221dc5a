//! SQLite backend for spigot's subject records and grant counter.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every statement for one connection
//! runs on that thread in order, which is what makes the conditional lock
//! write atomic.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{SqliteCounter, SqliteStore};

#[cfg(test)]
mod tests;
