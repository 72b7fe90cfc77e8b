use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use mls_sync::{config, db, sync};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler loop, syncing profiles whose interval has elapsed.
    Serve,
    /// Run a single extraction profile now.
    Run {
        /// Profile id to sync
        #[arg(long)]
        profile: i64,
        /// Delete the profile's local rows and refetch from the beginning
        #[arg(long)]
        resync: bool,
    },
    /// Delete locally stored listing rows.
    Clear {
        /// Limit the deletion to one profile's rows
        #[arg(long, conflicts_with = "all")]
        profile: Option<i64>,
        /// Delete every stored listing row
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/mls-sync.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Serve => {
            let tick = Duration::from_secs(cfg.app.tick_interval_secs);
            info!("starting scheduler loop");
            loop {
                match db::due_profile_ids(&pool).await {
                    Ok(ids) => {
                        for id in ids {
                            sync::run_with_credentials(&pool, &cfg.bridge, id, false).await;
                        }
                    }
                    Err(err) => error!(?err, "failed to list due profiles"),
                }
                tokio::time::sleep(tick).await;
            }
        }
        Command::Run { profile, resync } => {
            let ok = sync::run_with_credentials(&pool, &cfg.bridge, profile, resync).await;
            if !ok {
                std::process::exit(1);
            }
        }
        Command::Clear { profile, all } => {
            if let Some(profile) = profile {
                let deleted = db::delete_listings_for_profile(&pool, profile).await?;
                info!(profile, deleted, "cleared listings for profile");
            } else if all {
                let deleted = db::clear_all_listings(&pool).await?;
                info!(deleted, "cleared all listings");
            } else {
                anyhow::bail!("clear requires --profile <id> or --all");
            }
        }
    }

    Ok(())
}
