use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use tg_botkit::config;
use tg_botkit::db;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Refresh today's statistics and prune old bot logs, then exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Delete bot logs older than this many days
    #[arg(long, default_value_t = 30)]
    keep_days: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let pool = db::init_pool(&cfg.database.url).await?;
    db::run_migrations(&pool).await?;

    let stats = db::update_daily_stats(&pool, Utc::now().date_naive()).await?;
    info!(
        date = %stats.date,
        users = stats.total_users,
        received = stats.messages_received,
        sent = stats.messages_sent,
        "daily stats refreshed"
    );

    let removed = db::cleanup_old_logs(&pool, args.keep_days).await?;
    info!(removed, keep_days = args.keep_days, "old logs pruned");
    Ok(())
}
