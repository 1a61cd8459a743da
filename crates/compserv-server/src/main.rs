//! compserv-server binary.
//!
//! Reads `configs/config.yaml` (see `--config-dir` / `--config-file`),
//! connects to the database, and serves `POST /results` over HTTP. The
//! schema must already be at the latest version; run `compserv-migrate up`
//! first.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use compserv_core::recorder::ResultRecorder;
use compserv_server::{Config, router};
use compserv_store_sqlite::{SqliteStore, connect};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Compliance result recording server")]
struct Cli {
  /// Directory holding the configuration file.
  #[arg(long, default_value = "configs")]
  config_dir: PathBuf,

  /// Configuration file name inside `--config-dir`.
  #[arg(long, default_value = "config.yaml")]
  config_file: String,
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
  let config_path = cli.config_dir.join(&cli.config_file);
  let config = Config::load(&config_path)
    .with_context(|| format!("failed to load configuration from {config_path:?}"))?;

  let registry = config.registry().context("failed to load migrations")?;
  let store_config = config
    .database
    .store_config()
    .await
    .context("failed to resolve database secret")?;
  let conn = connect(&store_config)
    .await
    .context("failed to connect to database")?;
  let store = SqliteStore::new(conn, registry.latest())
    .await
    .context("database schema is not ready; run `compserv-migrate up`")?;

  let app = router(ResultRecorder::new(Arc::new(store))).layer(TraceLayer::new_for_http());
  let address = config.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}
