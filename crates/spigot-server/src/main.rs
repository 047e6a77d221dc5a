//! spigot server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! store, connects to the Lotus node and serves the grant endpoints for the
//! configured mode. A background task sweeps locked subjects on an interval.
//!
//! # Admin secret hash generation
//!
//! To generate the argon2 PHC string for `admin_secret_hash`:
//!
//! ```
//! cargo run -p spigot-server --bin spigot -- --hash-secret
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::Parser;
use rand_core::OsRng;
use spigot_core::{blocklist::Blocklist, subject::Purpose};
use spigot_engine::{Backend, GrantOrchestrator, Reconciler};
use spigot_remote::{DealsClient, GitHubClient, LotusClient, RemoteReputation};
use spigot_server::{AppState, ServerConfig, auth::AuthConfig};
use spigot_store_sqlite::{SqliteCounter, SqliteStore};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "spigot grant server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for an admin secret entered on stdin and exit.
  #[arg(long)]
  hash_secret: bool,
}

/// The production collaborators.
struct Live;

impl Backend for Live {
  type Store = SqliteStore;
  type Ledger = LotusClient;
  type Reputation = RemoteReputation;
  type Counter = SqliteCounter;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_secret {
    let secret = read_secret()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(secret.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("SPIGOT")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  let cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let store_path = expand_tilde(&cfg.store_path);
  let store = Arc::new(
    SqliteStore::open(&store_path)
      .await
      .with_context(|| format!("failed to open store at {store_path:?}"))?,
  );

  let blocklist = match &cfg.blocklist_path {
    Some(path) => {
      let path = expand_tilde(path);
      let blocklist = Blocklist::load(&path)
        .with_context(|| format!("failed to load blocklist {path:?}"))?;
      tracing::info!(entries = blocklist.len(), "blocklist loaded");
      blocklist
    }
    None => Blocklist::empty(),
  };
  let blocklist = Arc::new(blocklist);

  let ledger = Arc::new(LotusClient::new(cfg.lotus.clone()).context("failed to build Lotus client")?);
  let reputation = Arc::new(RemoteReputation::new(
    GitHubClient::new(cfg.github.clone()).context("failed to build GitHub client")?,
    DealsClient::new(cfg.deals.clone()).context("failed to build deals client")?,
  ));

  let mut orchestrators = Vec::new();
  for purpose in cfg.mode.purposes() {
    let policy = cfg
      .policy(purpose)
      .cloned()
      .with_context(|| format!("mode {:?} needs a [{purpose}] policy table", cfg.mode))?;

    let counter = store.counter(purpose.to_string());
    counter
      .ensure()
      .await
      .with_context(|| format!("failed to initialise {purpose} counter"))?;

    let mut orchestrator = GrantOrchestrator::<Live>::new(
      purpose,
      policy,
      store.clone(),
      ledger.clone(),
      reputation.clone(),
    )
    .with_blocklist(blocklist.clone())
    .with_counter(Arc::new(counter))
    .with_submit_timeout(Duration::from_secs(cfg.submit_timeout_secs));
    if cfg.watch.enabled {
      orchestrator = orchestrator.with_watch(cfg.watch.settings);
    }
    orchestrators.push((purpose, Arc::new(orchestrator)));
  }

  let enabled = |wanted: Purpose| {
    orchestrators
      .iter()
      .find(|(purpose, _)| *purpose == wanted)
      .map(|(_, orchestrator)| orchestrator.clone())
  };
  let state = AppState {
    allocation: enabled(Purpose::Allocation),
    faucet:     enabled(Purpose::Faucet),
    ledger:     ledger.clone(),
    auth:       Arc::new(AuthConfig {
      jwt_secret:        cfg.jwt_secret.clone(),
      admin_secret_hash: cfg.admin_secret_hash.clone(),
    }),
  };

  let reconciler = Reconciler::<Live>::new(store.clone(), ledger.clone());
  tokio::spawn(
    reconciler.run_periodic(cfg.mode.purposes(), Duration::from_secs(cfg.sweep_interval_secs)),
  );

  let app = spigot_server::router(state);
  let address = format!("{}:{}", cfg.host, cfg.port);

  tracing::info!(mode = ?cfg.mode, "Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

fn read_secret() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Admin secret: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
