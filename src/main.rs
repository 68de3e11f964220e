use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tg_botkit::bot::TelegramBot;
use tg_botkit::config::{self, BotMode};
use tg_botkit::db;
use tg_botkit::memory::{ConversationMemory, Mem0Client};
use tg_botkit::server::{self, AppState};
use tg_botkit::telegram::{
    resolve_webhook_secret, LoggedApi, TelegramApi, TeloxideApi, WebhookManager,
};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Overrides `bot.mode` (polling or webhook)
    #[arg(long, value_parser = parse_mode)]
    mode: Option<BotMode>,
}

fn parse_mode(s: &str) -> Result<BotMode, String> {
    BotMode::parse_mode(s).ok_or_else(|| format!("unknown mode `{s}`, expected polling or webhook"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let cfg = config::load_with_mode(Some(&args.config), args.mode)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.app.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let pool = db::init_pool(&cfg.database.url).await?;
    db::run_migrations(&pool).await?;

    let telegram = TeloxideApi::new(&cfg.bot.token);
    let api: Arc<dyn TelegramApi> =
        Arc::new(LoggedApi::new(Arc::new(telegram.clone()), pool.clone()));
    let memory = Mem0Client::from_config(&cfg.memory)?.map(|client| {
        Arc::new(ConversationMemory::new(
            Arc::new(client),
            cfg.memory.buffer_size,
        ))
    });
    if memory.is_none() {
        info!("conversation memory disabled");
    }

    let mut bot = TelegramBot::new(cfg.clone(), api, pool, memory);
    bot.initialize().await?;
    let bot = Arc::new(bot);

    let secret = resolve_webhook_secret(&cfg);
    let webhooks = WebhookManager::new(
        telegram.bot().clone(),
        cfg.webhook_endpoint(),
        secret.clone(),
    );

    let mut poller = None;
    let webhook_secret = match cfg.bot.mode {
        BotMode::Webhook => {
            webhooks.setup_webhook().await?;
            bot.set_running(true);
            Some(secret)
        }
        BotMode::Polling => {
            if let Err(err) = webhooks.remove_webhook().await {
                warn!(%err, "failed to clear webhook before polling");
            }
            let bot = bot.clone();
            let source = telegram.clone();
            poller = Some(tokio::spawn(async move {
                if let Err(err) = bot.run_polling(&source).await {
                    error!(?err, "polling loop failed");
                }
            }));
            None
        }
    };

    let addr = cfg.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, mode = cfg.bot.mode.as_str(), "starting telegram bot");

    let app = server::router(AppState {
        bot: bot.clone(),
        webhook_secret,
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    bot.stop().await;
    if let Some(handle) = poller {
        handle.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
