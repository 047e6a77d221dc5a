//! HTTP clients for spigot's remote collaborators: the Lotus node that
//! submits grants, and the GitHub and deal-count APIs that feed reputation
//! scoring.

mod deals;
mod github;
mod hamt;
mod lotus;

pub mod error;

pub use deals::{DealsClient, DealsConfig};
pub use error::{Error, Result};
pub use github::{GitHubClient, GitHubConfig};
pub use lotus::{LotusClient, LotusConfig};

use spigot_core::{
  address::Address,
  reputation::{ActivityHistory, ReputationSource},
  subject::LinkedAccount,
};

/// [`ReputationSource`] backed by the GitHub events feed and the deal-count
/// API.
#[derive(Clone)]
pub struct RemoteReputation {
  github: GitHubClient,
  deals:  DealsClient,
}

impl RemoteReputation {
  pub fn new(github: GitHubClient, deals: DealsClient) -> Self { Self { github, deals } }
}

impl ReputationSource for RemoteReputation {
  type Error = Error;

  async fn activity(&self, account: &LinkedAccount) -> Result<ActivityHistory> {
    self.github.event_history(&account.username).await
  }

  async fn verified_deal_count(&self, target: &Address) -> Result<u64> {
    self.deals.verified_deal_count(target).await
  }
}
