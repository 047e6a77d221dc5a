//! Conversions between domain types and the plain-text SQLite columns.
//!
//! UUIDs are stored as hyphenated lowercase strings, purposes as their
//! lowercase names, and the subject record and grant states as compact JSON.

use std::str::FromStr as _;

use spigot_core::subject::{GrantState, Purpose, Subject};
use uuid::Uuid;

use crate::{Error, Result};

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn encode_purpose(p: Purpose) -> &'static str {
  match p {
    Purpose::Allocation => "allocation",
    Purpose::Faucet => "faucet",
  }
}

pub fn decode_purpose(s: &str) -> Result<Purpose> {
  Purpose::from_str(s).map_err(|_| Error::UnknownPurpose(s.to_owned()))
}

/// Split a record into its `subjects` document (grants stripped) and one
/// `grants` document per purpose.
pub fn encode_subject(mut subject: Subject) -> Result<(String, Vec<(&'static str, String)>)> {
  let grants = std::mem::take(&mut subject.grants);
  let record_json = serde_json::to_string(&subject)?;
  let grants = grants
    .iter()
    .map(|(purpose, grant)| Ok((encode_purpose(*purpose), serde_json::to_string(grant)?)))
    .collect::<Result<Vec<_>>>()?;
  Ok((record_json, grants))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// A `subjects` row together with its `grants` and `locks` rows.
pub struct RawSubject {
  pub subject_id:  String,
  pub record_json: String,
  pub grants:      Vec<(String, String)>,
  pub locks:       Vec<(String, bool)>,
}

impl RawSubject {
  pub fn into_subject(self) -> Result<Subject> {
    let mut subject: Subject = serde_json::from_str(&self.record_json)?;
    subject.subject_id = Uuid::parse_str(&self.subject_id)?;

    subject.grants.clear();
    for (purpose, state_json) in self.grants {
      let mut grant: GrantState = serde_json::from_str(&state_json)?;
      grant.locked = false;
      subject.grants.insert(decode_purpose(&purpose)?, grant);
    }
    for (purpose, locked) in self.locks {
      let purpose = decode_purpose(&purpose)?;
      if locked || subject.grants.contains_key(&purpose) {
        subject.grant_mut(purpose).locked = locked;
      }
    }
    Ok(subject)
  }
}
