//! Runtime configuration, deserialised from `config.toml` and `SPIGOT_*`
//! environment variables. Nested keys use `__`, e.g. `SPIGOT_LOTUS__TOKEN`.

use std::path::PathBuf;

use serde::Deserialize;
use spigot_core::subject::Purpose;
use spigot_engine::{GrantPolicy, WatchSettings};
use spigot_remote::{DealsConfig, GitHubConfig, LotusConfig};

/// Which grant endpoints this instance serves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
  Faucet,
  Allocation,
  #[default]
  Both,
}

impl Mode {
  pub fn purposes(self) -> Vec<Purpose> {
    match self {
      Mode::Faucet => vec![Purpose::Faucet],
      Mode::Allocation => vec![Purpose::Allocation],
      Mode::Both => vec![Purpose::Allocation, Purpose::Faucet],
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchConfig {
  /// Spawn a watch task per successful submission, on top of the sweep.
  #[serde(default)]
  pub enabled:  bool,
  #[serde(flatten)]
  pub settings: WatchSettings,
}

fn default_host() -> String { "0.0.0.0".to_owned() }
fn default_port() -> u16 { 8080 }
fn default_sweep_interval_secs() -> u64 { 60 * 60 }
fn default_submit_timeout_secs() -> u64 { 60 }

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                String,
  #[serde(default = "default_port")]
  pub port:                u16,
  pub store_path:          PathBuf,
  /// HMAC key for bearer tokens issued by the sign-in service.
  pub jwt_secret:          String,
  /// Argon2 PHC string guarding the counter endpoints. Unset disables them.
  #[serde(default)]
  pub admin_secret_hash:   Option<String>,
  #[serde(default)]
  pub mode:                Mode,
  /// One address per line; `#` starts a comment.
  #[serde(default)]
  pub blocklist_path:      Option<PathBuf>,
  #[serde(default = "default_sweep_interval_secs")]
  pub sweep_interval_secs: u64,
  #[serde(default = "default_submit_timeout_secs")]
  pub submit_timeout_secs: u64,
  #[serde(default)]
  pub watch:               WatchConfig,
  pub lotus:               LotusConfig,
  #[serde(default)]
  pub github:              GitHubConfig,
  #[serde(default)]
  pub deals:               DealsConfig,
  #[serde(default)]
  pub allocation:          Option<GrantPolicy>,
  #[serde(default)]
  pub faucet:              Option<GrantPolicy>,
}

impl ServerConfig {
  pub fn policy(&self, purpose: Purpose) -> Option<&GrantPolicy> {
    match purpose {
      Purpose::Allocation => self.allocation.as_ref(),
      Purpose::Faucet => self.faucet.as_ref(),
    }
  }
}
