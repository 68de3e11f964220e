use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tg_botkit::config;
use tg_botkit::telegram::{resolve_webhook_secret, TeloxideApi, WebhookManager};

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect or change the bot's webhook registration")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Register `bot.webhook_url` + `bot.webhook_path` with Telegram
    Set,
    /// Remove the webhook so polling works again
    Remove,
    /// Print the current webhook status
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let api = TeloxideApi::new(&cfg.bot.token);
    let manager = WebhookManager::new(
        api.bot().clone(),
        cfg.webhook_endpoint(),
        resolve_webhook_secret(&cfg),
    );

    match args.action {
        Action::Set => {
            manager.setup_webhook().await?;
            println!("Webhook set to {}", cfg.webhook_endpoint().unwrap_or_default());
        }
        Action::Remove => {
            manager.remove_webhook().await?;
            println!("Webhook removed");
        }
        Action::Info => {
            let status = manager.get_webhook_info().await?;
            if !status.is_set() {
                println!("No webhook set (polling mode)");
                return Ok(());
            }
            println!("URL: {}", status.url);
            println!("Pending updates: {}", status.pending_update_count);
            if let Some(max) = status.max_connections {
                println!("Max connections: {max}");
            }
            if let Some(err) = status.last_error_message {
                println!("Last error: {err}");
            }
        }
    }
    Ok(())
}
