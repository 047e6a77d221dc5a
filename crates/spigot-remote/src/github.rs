//! Public GitHub activity, used as a reputation signal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::Deserialize;
use spigot_core::reputation::ActivityHistory;
use tracing::debug;

use crate::{Error, Result};

fn default_api_base() -> String { "https://api.github.com".to_owned() }
fn default_max_events() -> usize { 300 }

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
  #[serde(default = "default_api_base")]
  pub api_base:   String,
  /// Raises the unauthenticated rate limit.
  #[serde(default)]
  pub token:      Option<String>,
  /// GitHub serves at most this many events per user.
  #[serde(default = "default_max_events")]
  pub max_events: usize,
}

impl Default for GitHubConfig {
  fn default() -> Self {
    Self { api_base: default_api_base(), token: None, max_events: default_max_events() }
  }
}

#[derive(Debug, Deserialize)]
struct Event {
  created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct GitHubClient {
  client: Client,
  config: GitHubConfig,
}

impl GitHubClient {
  pub fn new(config: GitHubConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .user_agent(concat!("spigot/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client, config })
  }

  /// Event timestamps for `username`, following `rel="next"` links until the
  /// feed ends or `max_events` have been read.
  pub async fn event_history(&self, username: &str) -> Result<ActivityHistory> {
    let mut url = Some(format!(
      "{}/users/{}/events?per_page=100",
      self.config.api_base.trim_end_matches('/'),
      username
    ));
    let mut history = ActivityHistory::default();

    while let Some(page_url) = url.take() {
      let mut req = self
        .client
        .get(&page_url)
        .header(header::ACCEPT, "application/vnd.github.v3+json");
      if let Some(token) = &self.config.token {
        req = req.bearer_auth(token);
      }
      let resp = req.send().await?;
      if !resp.status().is_success() {
        return Err(Error::Status { url: page_url, status: resp.status() });
      }

      url = resp
        .headers()
        .get(header::LINK)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| link_target(v, "next"));
      let events: Vec<Event> = resp.json().await?;
      if !push_page(&mut history, events, self.config.max_events) {
        break;
      }
    }

    debug!(username, events = history.events.len(), truncated = history.truncated, "activity");
    Ok(history)
  }
}

/// Append one page of events. Returns whether another page is wanted.
///
/// Reaching `max_events` marks the history truncated whether or not GitHub
/// sent a further link.
fn push_page(history: &mut ActivityHistory, page: Vec<Event>, max_events: usize) -> bool {
  history.events.extend(page.into_iter().map(|e| e.created_at));
  if history.events.len() >= max_events {
    history.events.truncate(max_events);
    history.truncated = true;
    return false;
  }
  true
}

/// The URI of the entry with `rel="<rel>"` in a `Link` header.
fn link_target(link: &str, rel: &str) -> Option<String> {
  let wanted = format!("rel=\"{rel}\"");
  link.split(',').find_map(|entry| {
    let (uri, params) = entry.trim().split_once(';')?;
    let uri = uri.trim().strip_prefix('<')?.strip_suffix('>')?;
    params.split(';').any(|p| p.trim() == wanted).then(|| uri.to_owned())
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn finds_next_link() {
    let link = r#"<https://api.github.com/user/1/events?page=2>; rel="next", <https://api.github.com/user/1/events?page=3>; rel="last""#;
    assert_eq!(
      link_target(link, "next").as_deref(),
      Some("https://api.github.com/user/1/events?page=2")
    );
    assert_eq!(
      link_target(link, "last").as_deref(),
      Some("https://api.github.com/user/1/events?page=3")
    );
  }

  #[test]
  fn missing_rel_is_none() {
    let link = r#"<https://api.github.com/user/1/events?page=1>; rel="prev""#;
    assert_eq!(link_target(link, "next"), None);
    assert_eq!(link_target("", "next"), None);
  }

  fn page(n: usize) -> Vec<Event> {
    (0..n).map(|_| Event { created_at: Utc::now() }).collect()
  }

  #[test]
  fn full_feed_is_truncated() {
    let mut history = ActivityHistory::default();
    assert!(push_page(&mut history, page(100), 300));
    assert!(push_page(&mut history, page(100), 300));
    assert!(!push_page(&mut history, page(100), 300));
    assert_eq!(history.events.len(), 300);
    assert!(history.truncated);
  }

  #[test]
  fn short_feed_is_complete() {
    let mut history = ActivityHistory::default();
    assert!(push_page(&mut history, page(100), 300));
    assert!(push_page(&mut history, page(42), 300));
    assert_eq!(history.events.len(), 142);
    assert!(!history.truncated);
  }

  #[test]
  fn oversized_page_is_capped() {
    let mut history = ActivityHistory::default();
    assert!(!push_page(&mut history, page(120), 100));
    assert_eq!(history.events.len(), 100);
    assert!(history.truncated);
  }

  #[test]
  fn events_parse_created_at() {
    let events: Vec<Event> =
      serde_json::from_str(r#"[{"id":"1","created_at":"2024-01-02T03:04:05Z"}]"#).unwrap();
    assert_eq!(events[0].created_at.to_rfc3339(), "2024-01-02T03:04:05+00:00");
  }
}
