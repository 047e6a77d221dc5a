//! SQL schema for the spigot SQLite store.
//!
//! Applied by [`SqliteStore::open`](crate::SqliteStore::open) on every
//! connection; `user_version` records the layout revision.

/// Idempotent DDL.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Identity and linked accounts, as one JSON document per subject.
CREATE TABLE IF NOT EXISTS subjects (
    subject_id  TEXT PRIMARY KEY,
    record_json TEXT NOT NULL
);

-- Grant history and pending operation, one JSON document per purpose.
-- The `locked` field inside the document is ignored on read.
CREATE TABLE IF NOT EXISTS grants (
    subject_id  TEXT NOT NULL REFERENCES subjects(subject_id),
    purpose     TEXT NOT NULL,
    state_json  TEXT NOT NULL,
    PRIMARY KEY (subject_id, purpose)
);

-- One row per (subject, purpose). A missing row reads as unlocked.
CREATE TABLE IF NOT EXISTS locks (
    subject_id  TEXT    NOT NULL REFERENCES subjects(subject_id),
    purpose     TEXT    NOT NULL,   -- 'allocation' | 'faucet'
    locked      INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (subject_id, purpose)
);

-- Index of external accounts, rebuilt from the record on every put.
CREATE TABLE IF NOT EXISTS linked_accounts (
    provider    TEXT NOT NULL,
    unique_id   TEXT NOT NULL,
    subject_id  TEXT NOT NULL REFERENCES subjects(subject_id),
    PRIMARY KEY (provider, unique_id)
);

CREATE TABLE IF NOT EXISTS counters (
    name        TEXT PRIMARY KEY,
    value       INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS locks_held_idx ON locks(purpose) WHERE locked = 1;

PRAGMA user_version = 1;
";
