//! [`SqliteStore`], the SQLite implementation of [`SubjectStore`], and
//! [`SqliteCounter`], its [`GlobalCounter`].

use std::path::Path;

use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use spigot_core::{
  counter::GlobalCounter,
  store::{LockWrite, SubjectQuery, SubjectStore},
  subject::{GrantState, OperationHandle, Purpose, Subject},
};

use crate::{
  encode::{encode_purpose, encode_subject, encode_uuid, RawSubject},
  schema::SCHEMA,
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// Subject records backed by a single SQLite file.
///
/// Clones share one connection.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// A named counter sharing this store's connection.
  pub fn counter(&self, name: impl Into<String>) -> SqliteCounter {
    SqliteCounter { conn: self.conn.clone(), name: name.into() }
  }
}

fn read_subject(
  conn: &rusqlite::Connection,
  id: &str,
) -> rusqlite::Result<Option<RawSubject>> {
  let record_json: Option<String> = conn
    .query_row(
      "SELECT record_json FROM subjects WHERE subject_id = ?1",
      rusqlite::params![id],
      |row| row.get(0),
    )
    .optional()?;

  let Some(record_json) = record_json else {
    return Ok(None);
  };

  let mut stmt = conn.prepare("SELECT purpose, state_json FROM grants WHERE subject_id = ?1")?;
  let grants = stmt
    .query_map(rusqlite::params![id], |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut stmt = conn.prepare("SELECT purpose, locked FROM locks WHERE subject_id = ?1")?;
  let locks = stmt
    .query_map(rusqlite::params![id], |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(Some(RawSubject { subject_id: id.to_owned(), record_json, grants, locks }))
}

fn subject_exists(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row("SELECT 1 FROM subjects WHERE subject_id = ?1", rusqlite::params![id], |_| {
        Ok(())
      })
      .optional()?
      .is_some(),
  )
}

fn lock_held(conn: &rusqlite::Connection, id: &str, purpose: &str) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row(
        "SELECT locked FROM locks WHERE subject_id = ?1 AND purpose = ?2",
        rusqlite::params![id, purpose],
        |row| row.get::<_, bool>(0),
      )
      .optional()?
      .unwrap_or(false),
  )
}

// ─── SubjectStore impl ───────────────────────────────────────────────────────

impl SubjectStore for SqliteStore {
  type Error = Error;

  async fn get(&self, id: Uuid) -> Result<Option<Subject>> {
    let id_str = encode_uuid(id);

    let raw = self
      .conn
      .call(move |conn| Ok(read_subject(conn, &id_str)?))
      .await?;

    raw.map(RawSubject::into_subject).transpose()
  }

  async fn put(&self, subject: Subject) -> Result<()> {
    let id_str = encode_uuid(subject.subject_id);
    let accounts: Vec<(String, String)> = subject
      .linked_accounts
      .iter()
      .map(|(provider, account)| (provider.clone(), account.unique_id.clone()))
      .collect();
    let (record_json, grants) = encode_subject(subject)?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO subjects (subject_id, record_json) VALUES (?1, ?2)
           ON CONFLICT (subject_id) DO UPDATE SET record_json = excluded.record_json",
          rusqlite::params![id_str, record_json],
        )?;

        // Grant state under a held lock is left to the lock holder.
        for (purpose, state_json) in grants {
          tx.execute(
            "INSERT INTO grants (subject_id, purpose, state_json)
             SELECT ?1, ?2, ?3
             WHERE NOT EXISTS (
               SELECT 1 FROM locks
               WHERE subject_id = ?1 AND purpose = ?2 AND locked = 1)
             ON CONFLICT (subject_id, purpose) DO UPDATE SET state_json = excluded.state_json",
            rusqlite::params![id_str, purpose, state_json],
          )?;
        }

        tx.execute("DELETE FROM linked_accounts WHERE subject_id = ?1", rusqlite::params![
          id_str
        ])?;
        for (provider, unique_id) in accounts {
          tx.execute(
            "INSERT INTO linked_accounts (provider, unique_id, subject_id) VALUES (?1, ?2, ?3)
             ON CONFLICT (provider, unique_id) DO UPDATE SET subject_id = excluded.subject_id",
            rusqlite::params![provider, unique_id, id_str],
          )?;
        }

        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn set_lock(
    &self,
    id:       Uuid,
    purpose:  Purpose,
    expected: bool,
    desired:  bool,
  ) -> Result<LockWrite> {
    let id_str  = encode_uuid(id);
    let purpose = encode_purpose(purpose);

    let changed: Option<usize> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if !subject_exists(&tx, &id_str)? {
          return Ok(None);
        }

        // An absent row reads as unlocked, so only the `expected = false`
        // case may create one.
        let changed = if expected {
          tx.execute(
            "UPDATE locks SET locked = ?3
             WHERE subject_id = ?1 AND purpose = ?2 AND locked = 1",
            rusqlite::params![id_str, purpose, desired],
          )?
        } else {
          tx.execute(
            "INSERT INTO locks (subject_id, purpose, locked) VALUES (?1, ?2, ?3)
             ON CONFLICT (subject_id, purpose)
             DO UPDATE SET locked = excluded.locked WHERE locks.locked = 0",
            rusqlite::params![id_str, purpose, desired],
          )?
        };
        tx.commit()?;
        Ok(Some(changed))
      })
      .await?;

    match changed {
      None => Err(Error::SubjectNotFound(id)),
      Some(0) => Ok(LockWrite::ConditionFailed),
      Some(_) => Ok(LockWrite::Applied),
    }
  }

  async fn update_grant(
    &self,
    id:       Uuid,
    purpose:  Purpose,
    expected: Option<&OperationHandle>,
    grant:    &GrantState,
  ) -> Result<LockWrite> {
    let id_str     = encode_uuid(id);
    let purpose    = encode_purpose(purpose);
    let expected   = expected.map(|h| h.as_str().to_owned());
    let state_json = serde_json::to_string(grant)?;
    let locked     = grant.locked;

    let applied: Option<bool> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if !subject_exists(&tx, &id_str)? {
          return Ok(None);
        }
        if !lock_held(&tx, &id_str, purpose)? {
          return Ok(Some(false));
        }

        let current: Option<String> = tx
          .query_row(
            "SELECT json_extract(state_json, '$.pending.handle')
             FROM grants WHERE subject_id = ?1 AND purpose = ?2",
            rusqlite::params![id_str, purpose],
            |row| row.get::<_, Option<String>>(0),
          )
          .optional()?
          .flatten();
        if current != expected {
          return Ok(Some(false));
        }

        tx.execute(
          "INSERT INTO grants (subject_id, purpose, state_json) VALUES (?1, ?2, ?3)
           ON CONFLICT (subject_id, purpose) DO UPDATE SET state_json = excluded.state_json",
          rusqlite::params![id_str, purpose, state_json],
        )?;
        tx.execute(
          "UPDATE locks SET locked = ?3 WHERE subject_id = ?1 AND purpose = ?2",
          rusqlite::params![id_str, purpose, locked],
        )?;
        tx.commit()?;
        Ok(Some(true))
      })
      .await?;

    match applied {
      None => Err(Error::SubjectNotFound(id)),
      Some(false) => Ok(LockWrite::ConditionFailed),
      Some(true) => Ok(LockWrite::Applied),
    }
  }

  async fn scan(&self, query: &SubjectQuery) -> Result<Vec<Subject>> {
    let purpose = query.locked.map(encode_purpose);
    let (provider, unique_id) = query.linked_account.clone().unzip();
    let limit_val = query.limit.map_or(-1, |l| l as i64);

    let raws: Vec<RawSubject> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT s.subject_id
           FROM subjects s
           WHERE (?1 IS NULL OR EXISTS (
                    SELECT 1 FROM locks l
                    WHERE l.subject_id = s.subject_id AND l.purpose = ?1 AND l.locked = 1))
             AND (?2 IS NULL OR EXISTS (
                    SELECT 1 FROM linked_accounts a
                    WHERE a.subject_id = s.subject_id AND a.provider = ?2 AND a.unique_id = ?3))
           ORDER BY s.subject_id
           LIMIT ?4",
        )?;
        let ids = stmt
          .query_map(rusqlite::params![purpose, provider, unique_id, limit_val], |row| {
            row.get::<_, String>(0)
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut raws = Vec::with_capacity(ids.len());
        for id in ids {
          raws.extend(read_subject(conn, &id)?);
        }
        Ok(raws)
      })
      .await?;

    raws.into_iter().map(RawSubject::into_subject).collect()
  }
}

// ─── Counter ─────────────────────────────────────────────────────────────────

/// A row in the `counters` table. A missing row reads as zero.
#[derive(Clone)]
pub struct SqliteCounter {
  conn: tokio_rusqlite::Connection,
  name: String,
}

impl SqliteCounter {
  pub fn name(&self) -> &str { &self.name }

  /// Create the row at zero if it does not exist yet.
  pub async fn ensure(&self) -> Result<()> {
    let name = self.name.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO counters (name, value) VALUES (?1, 0) ON CONFLICT (name) DO NOTHING",
          rusqlite::params![name],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  fn decode(&self, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| Error::InvalidCounter { name: self.name.clone(), value })
  }
}

impl GlobalCounter for SqliteCounter {
  type Error = Error;

  async fn get(&self) -> Result<u64> {
    let name = self.name.clone();
    let value: Option<i64> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT value FROM counters WHERE name = ?1",
            rusqlite::params![name],
            |row| row.get(0),
          )
          .optional()?)
      })
      .await?;
    self.decode(value.unwrap_or(0))
  }

  async fn increment(&self) -> Result<u64> {
    let name = self.name.clone();
    let value: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "INSERT INTO counters (name, value) VALUES (?1, 1)
           ON CONFLICT (name) DO UPDATE SET value = value + 1
           RETURNING value",
          rusqlite::params![name],
          |row| row.get(0),
        )?)
      })
      .await?;
    self.decode(value)
  }

  async fn reset(&self) -> Result<()> {
    let name = self.name.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO counters (name, value) VALUES (?1, 0)
           ON CONFLICT (name) DO UPDATE SET value = 0",
          rusqlite::params![name],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
