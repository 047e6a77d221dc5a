//! The set of target addresses that may never receive a grant.
//!
//! Loaded once at startup from a newline-separated text file and held in
//! memory; lookups are exact matches on the normalised address.

use std::{
  collections::HashSet,
  fs::File,
  io::{BufRead, BufReader},
  path::Path,
};

use crate::{Error, Result, address::Address};

#[derive(Debug, Clone, Default)]
pub struct Blocklist {
  entries: HashSet<Address>,
}

impl Blocklist {
  pub fn empty() -> Self { Self::default() }

  /// Read one address per line. Blank lines and lines starting with `#` are
  /// skipped; any other unparsable line is an error.
  pub fn from_reader(reader: impl BufRead) -> Result<Self> {
    let mut entries = HashSet::new();
    for (idx, line) in reader.lines().enumerate() {
      let line = line?;
      let trimmed = line.trim();
      if trimmed.is_empty() || trimmed.starts_with('#') {
        continue;
      }
      let addr = Address::parse(trimmed).map_err(|e| Error::Blocklist {
        line:   idx + 1,
        source: Box::new(e),
      })?;
      entries.insert(addr);
    }
    Ok(Self { entries })
  }

  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let file = File::open(path)?;
    Self::from_reader(BufReader::new(file))
  }

  pub fn contains(&self, addr: &Address) -> bool { self.entries.contains(addr) }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

impl FromIterator<Address> for Blocklist {
  fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
    Self { entries: iter.into_iter().collect() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn skips_comments_and_blank_lines() {
    let text = "# storage providers\nf01234\n\n  F05678  \n";
    let list = Blocklist::from_reader(text.as_bytes()).unwrap();
    assert_eq!(list.len(), 2);
    assert!(list.contains(&Address::parse("f05678").unwrap()));
    assert!(!list.contains(&Address::parse("f09999").unwrap()));
  }

  #[test]
  fn reports_the_offending_line() {
    let text = "f01234\nnot-an-address\n";
    let err = Blocklist::from_reader(text.as_bytes()).unwrap_err();
    assert!(matches!(err, Error::Blocklist { line: 2, .. }));
  }
}
