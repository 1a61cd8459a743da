//! compserv-migrate: operator CLI for the schema migration engine.
//!
//! ```text
//! compserv-migrate              # same as `up`
//! compserv-migrate up           # latest, or migrations.target_version
//! compserv-migrate down         # revert everything
//! compserv-migrate goto 5
//! compserv-migrate version
//! compserv-migrate force 4      # clear a dirty state after a manual fix
//! ```

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use compserv_server::Config;
use compserv_store_sqlite::{Error, MigrationEngine, connect};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Compliance service schema migrations")]
struct Cli {
  /// Directory holding the configuration file.
  #[arg(long, default_value = "configs")]
  config_dir: PathBuf,

  /// Configuration file name inside `--config-dir`.
  #[arg(long, default_value = "config.yaml")]
  config_file: String,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
  /// Apply pending migrations.
  Up,
  /// Revert every migration.
  Down,
  /// Move to exactly this version, up or down.
  Goto { version: u32 },
  /// Report the current version and dirty flag.
  Version,
  /// Record this version as current and clean without running anything.
  Force { version: u32 },
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
  let engine = MigrationEngine::new(conn, registry);

  match cli.command.unwrap_or(Command::Up) {
    Command::Up => {
      let applied = match config.migrations.target_version {
        Some(target) => engine.migrate(target).await,
        None => engine.up().await,
      }
      .context("migration failed")?;
      info!(applied, "migrations applied");
    }
    Command::Down => {
      let reverted = engine.down().await.context("migration failed")?;
      info!(reverted, "migrations reverted");
    }
    Command::Goto { version } => {
      let steps = engine.migrate(version).await.context("migration failed")?;
      info!(version, steps, "schema moved to target version");
    }
    Command::Version => match engine.version().await {
      Ok((version, dirty)) => info!(version, dirty, "current schema version"),
      Err(Error::NoMigration) => info!("no migration has been applied"),
      Err(e) => return Err(e).context("failed to read schema version"),
    },
    Command::Force { version } => {
      engine.force(version).await.context("failed to force version")?;
      info!(version, "force complete");
    }
  }

  Ok(())
}
