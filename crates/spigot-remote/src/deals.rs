//! Verified-deal counts from the Fil+ statistics API.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use spigot_core::address::Address;

use crate::{Error, Result};

fn default_api_base() -> String { "https://api.filplus.d.interplanetary.one/public/api".to_owned() }

#[derive(Debug, Clone, Deserialize)]
pub struct DealsConfig {
  #[serde(default = "default_api_base")]
  pub api_base: String,
  #[serde(default)]
  pub api_key:  Option<String>,
}

impl Default for DealsConfig {
  fn default() -> Self { Self { api_base: default_api_base(), api_key: None } }
}

/// The API reports the count as a decimal string.
#[derive(Debug, Deserialize)]
struct VerifiedDeals {
  count: String,
}

impl VerifiedDeals {
  fn count(&self) -> Result<u64> {
    self
      .count
      .trim()
      .parse()
      .map_err(|_| Error::Decode(format!("deal count {:?}", self.count)))
  }
}

#[derive(Clone)]
pub struct DealsClient {
  client: Client,
  config: DealsConfig,
}

impl DealsClient {
  pub fn new(config: DealsConfig) -> Result<Self> {
    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
    Ok(Self { client, config })
  }

  /// `GET /getVerifiedDeals/<address>?limit=1&page=1`
  pub async fn verified_deal_count(&self, address: &Address) -> Result<u64> {
    let url = format!(
      "{}/getVerifiedDeals/{}",
      self.config.api_base.trim_end_matches('/'),
      address
    );
    let mut req = self.client.get(&url).query(&[("limit", "1"), ("page", "1")]);
    if let Some(key) = &self.config.api_key {
      req = req.header("x-api-key", key);
    }

    let resp = req.send().await?;
    if !resp.status().is_success() {
      return Err(Error::Status { url, status: resp.status() });
    }
    resp.json::<VerifiedDeals>().await?.count()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn count_is_parsed_from_string() {
    let deals: VerifiedDeals = serde_json::from_str(r#"{"count":"42","data":[]}"#).unwrap();
    assert_eq!(deals.count().unwrap(), 42);
  }

  #[test]
  fn malformed_count_is_an_error() {
    let deals: VerifiedDeals = serde_json::from_str(r#"{"count":"many"}"#).unwrap();
    assert!(matches!(deals.count(), Err(Error::Decode(_))));
  }
}
