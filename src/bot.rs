//! The bot runtime: gating, persistence, memory and dispatch of updates.
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use teloxide::types::{Update, UpdateKind};
use tracing::{error, info, instrument, warn};

use crate::config::{BotMode, Config};
use crate::db::{self, LogLevel, NewChat, NewMessage, NewUser, Pool};
use crate::error::BotError;
use crate::handlers::{action, HandlerFactory, UpdateContext};
use crate::memory::{ConversationMemory, MemoryMessage};
use crate::model::{ChatMemberInfo, UpdateType};
use crate::processor::UpdateProcessor;
use crate::ratelimit::RateLimiter;
use crate::state::{ContextStore, KeyedLock};
use crate::telegram::{SendOptions, TelegramApi, UpdateSource};
use crate::util::format::{bold, format_list};
use crate::util::parse_command_args;

pub const UNAUTHORIZED_REPLY: &str = "Sorry, you're not authorized to use this bot.";
pub const RATE_LIMIT_REPLY: &str = "Rate limit exceeded. Please try again later.";
pub const NO_MEMORY_REPLY: &str = "Conversation memory is not enabled.";

const POLL_TIMEOUT_SECS: u32 = 30;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Commands seeded into `bot_commands`: (command, description, admin only).
pub const DEFAULT_COMMANDS: [(&str, &str, bool); 5] = [
    ("start", "Start the bot", false),
    ("help", "Show help", false),
    ("status", "Check bot status", false),
    ("context", "Show what the bot remembers", false),
    ("stats", "Show today's statistics", true),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotStatus {
    pub is_running: bool,
    pub mode: BotMode,
    pub token_configured: bool,
    pub webhook_configured: bool,
    pub admin_users: usize,
    pub allowed_users: usize,
    pub rate_limit: u32,
}

impl BotStatus {
    fn snapshot(config: &Config, running: bool) -> Self {
        Self {
            is_running: running,
            mode: config.bot.mode,
            token_configured: !config.bot.token.trim().is_empty(),
            webhook_configured: config.webhook_endpoint().is_some(),
            admin_users: config.bot.admin_users.len(),
            allowed_users: config.bot.allowed_users.len(),
            rate_limit: config.bot.rate_limit_per_minute,
        }
    }

    /// Markdown summary for the `/status` command.
    pub fn render(&self) -> String {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        let lines = [
            format!("Running: {}", yes_no(self.is_running)),
            format!("Mode: {}", self.mode.as_str()),
            format!("Webhook configured: {}", yes_no(self.webhook_configured)),
            format!("Admins: {}", self.admin_users),
            format!("Allowed users: {}", self.allowed_users),
            format!("Rate limit: {}/min", self.rate_limit),
        ];
        format!("🤖 {}\n\n{}", bold("Bot Status"), format_list(&lines, false))
    }
}

fn welcome_text(memory: bool) -> String {
    let mut text = String::from(
        "🤖 Welcome to the Telegram Bot API Template!\n\n\
         This is a production-ready bot with comprehensive features.\n\n\
         Available commands:\n\
         /help - Show help\n\
         /status - Check bot status",
    );
    if memory {
        text.push_str("\n/context - Show what I remember about you");
    }
    text
}

fn help_text() -> String {
    let features = [
        "Message handling",
        "Command processing",
        "Callback queries",
        "Inline queries",
        "Webhook support",
        "Rate limiting",
        "User management",
    ];
    format!(
        "📚 {}\n\n{}\n/start - Start the bot\n/help - Show this help\n/status - Check bot status\n/context - Show conversation context\n\n{}\n{}",
        bold("Bot Help"),
        bold("Commands:"),
        bold("Features:"),
        format_list(&features, false)
    )
}

pub struct TelegramBot {
    config: Config,
    api: Arc<dyn TelegramApi>,
    pool: Pool,
    memory: Option<Arc<ConversationMemory>>,
    factory: HandlerFactory,
    processor: UpdateProcessor,
    store: Arc<ContextStore>,
    limiter: RateLimiter,
    chat_locks: KeyedLock,
    running: Arc<AtomicBool>,
}

impl TelegramBot {
    pub fn new(
        config: Config,
        api: Arc<dyn TelegramApi>,
        pool: Pool,
        memory: Option<Arc<ConversationMemory>>,
    ) -> Self {
        let limiter = RateLimiter::per_minute(config.bot.rate_limit_per_minute as usize);
        let factory = HandlerFactory::new(config.bot.admin_users.clone());
        Self {
            config,
            api,
            pool,
            memory,
            factory,
            processor: UpdateProcessor::new(),
            store: Arc::new(ContextStore::new()),
            limiter,
            chat_locks: KeyedLock::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers the standard handlers and default commands, and seeds the
    /// `bot_commands` table.
    #[instrument(skip_all)]
    pub async fn initialize(&mut self) -> Result<()> {
        self.factory.create_all_handlers();
        self.register_default_commands();
        self.factory.attach(&mut self.processor);

        for (command, description, admin_only) in DEFAULT_COMMANDS {
            db::upsert_bot_command(&self.pool, command, description, admin_only)
                .await
                .with_context(|| format!("failed to seed command /{command}"))?;
        }
        info!(mode = self.config.bot.mode.as_str(), "bot initialized");
        Ok(())
    }

    fn register_default_commands(&self) {
        let commands = self.factory.command();
        let has_memory = self.memory.is_some();

        commands.register_command(
            "start",
            action(move |ctx, _args: Vec<String>| async move {
                ctx.reply(&welcome_text(has_memory)).await?;
                Ok(())
            }),
            false,
        );

        commands.register_command(
            "help",
            action(|ctx, _args: Vec<String>| async move {
                ctx.reply_with(&help_text(), SendOptions::markdown()).await?;
                Ok(())
            }),
            false,
        );

        let config = self.config.clone();
        let running = self.running.clone();
        commands.register_command(
            "status",
            action(move |ctx, _args: Vec<String>| {
                let status = BotStatus::snapshot(&config, running.load(Ordering::SeqCst));
                async move {
                    ctx.reply_with(&status.render(), SendOptions::markdown()).await?;
                    Ok(())
                }
            }),
            false,
        );

        let memory = self.memory.clone();
        commands.register_command(
            "context",
            action(move |ctx, args: Vec<String>| {
                let memory = memory.clone();
                async move {
                    let (Some(memory), Some(user_id)) = (memory, ctx.user_id()) else {
                        ctx.reply(NO_MEMORY_REPLY).await?;
                        return Ok(());
                    };
                    let query = args.join(" ");
                    let query = (!query.is_empty()).then_some(query.as_str());
                    let context = memory.get_context(&user_id.to_string(), query).await;
                    ctx.reply(&context).await?;
                    Ok(())
                }
            }),
            false,
        );

        let pool = self.pool.clone();
        commands.register_command(
            "stats",
            action(move |ctx, _args: Vec<String>| {
                let pool = pool.clone();
                async move {
                    let today = Utc::now().date_naive();
                    let stats = db::update_daily_stats(&pool, today).await?;
                    let lines = [
                        format!("Users: {} ({} active)", stats.total_users, stats.active_users),
                        format!("Chats: {} ({} active)", stats.total_chats, stats.active_chats),
                        format!("Messages received: {}", stats.messages_received),
                        format!("Messages sent: {}", stats.messages_sent),
                        format!("Commands used: {}", stats.commands_used),
                        format!("Errors: {}", stats.errors_count),
                    ];
                    let text = format!(
                        "📊 {}\n\n{}",
                        bold(&format!("Statistics for {today}")),
                        format_list(&lines, false)
                    );
                    ctx.reply_with(&text, SendOptions::markdown()).await?;
                    Ok(())
                }
            }),
            true,
        );
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn api(&self) -> &Arc<dyn TelegramApi> {
        &self.api
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn factory(&self) -> &HandlerFactory {
        &self.factory
    }

    /// For registering custom handlers before the bot starts.
    pub fn processor_mut(&mut self) -> &mut UpdateProcessor {
        &mut self.processor
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn get_status(&self) -> BotStatus {
        BotStatus::snapshot(&self.config, self.is_running())
    }

    /// Runs one update through gating, persistence, memory and the handlers.
    /// Returns false when the update was dropped or its type is unknown.
    #[instrument(skip_all, fields(update_id = update.id))]
    pub async fn handle_update(&self, update: Update) -> Result<bool> {
        let ctx = UpdateContext::new(update, self.api.clone(), self.store.clone());
        let lock_key = match (ctx.chat_id(), ctx.user_id()) {
            (Some(chat), _) => Some(format!("chat:{chat}")),
            (None, Some(user)) => Some(format!("user:{user}")),
            _ => None,
        };
        let _guard = match &lock_key {
            Some(key) => Some(self.chat_locks.lock(key).await),
            None => None,
        };

        if !self.gate(&ctx).await {
            return Ok(false);
        }

        let ids = match self.persist(&ctx).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(?err, "failed to persist update");
                PersistedIds::default()
            }
        };

        self.remember(&ctx).await;

        let outcome = self.processor.dispatch(&ctx).await;
        for failure in &outcome.errors {
            let logged = db::insert_log(
                &self.pool,
                LogLevel::Error,
                failure,
                ids.user,
                ids.chat,
                Some(ctx.route.as_str()),
                None,
            )
            .await;
            if let Err(err) = logged {
                warn!(?err, "failed to record handler error");
            }
        }
        Ok(outcome.known)
    }

    /// Allow-list and rate limit checks. Only message senders get a reply.
    async fn gate(&self, ctx: &UpdateContext) -> bool {
        let Some(user_id) = ctx.user_id() else {
            return true;
        };
        let refusal = if !self.config.is_allowed(user_id) {
            UNAUTHORIZED_REPLY
        } else if !self.limiter.check_limit(&user_id.to_string()) {
            RATE_LIMIT_REPLY
        } else {
            return true;
        };

        warn!(user_id, reason = refusal, "update dropped");
        if matches!(ctx.update.kind, UpdateKind::Message(_)) {
            if let Err(err) = ctx.reply(refusal).await {
                error!(%err, "failed to send refusal");
            }
        }
        false
    }

    async fn persist(&self, ctx: &UpdateContext) -> Result<PersistedIds> {
        let mut ids = PersistedIds::default();
        if let Some(user) = ctx.update.user() {
            ids.user = Some(db::upsert_user(&self.pool, &NewUser::from(user)).await?.id);
        }
        if let Some(chat) = ctx.update.chat() {
            ids.chat = Some(db::upsert_chat(&self.pool, &NewChat::from(chat)).await?.id);
        }

        match &ctx.update.kind {
            UpdateKind::Message(msg) | UpdateKind::ChannelPost(msg) => {
                if let Some(chat_id) = ids.chat {
                    db::save_message(&self.pool, &NewMessage::from(msg), chat_id, ids.user).await?;
                }
                if ctx.route == UpdateType::Command {
                    let (command, _) = parse_command_args(msg.text().unwrap_or_default());
                    db::increment_command_usage(&self.pool, &command).await?;
                }
            }
            UpdateKind::ChatMember(change) | UpdateKind::MyChatMember(change) => {
                let member = &change.new_chat_member;
                let user = db::upsert_user(&self.pool, &NewUser::from(&member.user)).await?;
                if let Some(chat_id) = ids.chat {
                    db::upsert_chat_member(
                        &self.pool,
                        chat_id,
                        user.id,
                        &ChatMemberInfo::from_member(member),
                    )
                    .await?;
                }
            }
            _ => {}
        }

        db::insert_log(
            &self.pool,
            LogLevel::Info,
            "update received",
            ids.user,
            ids.chat,
            Some(ctx.route.as_str()),
            Some(&json!({ "update_id": ctx.update.id })),
        )
        .await?;
        Ok(ids)
    }

    async fn remember(&self, ctx: &UpdateContext) {
        let Some(memory) = &self.memory else {
            return;
        };
        let UpdateKind::Message(msg) = &ctx.update.kind else {
            return;
        };
        let Some(user_id) = ctx.user_id() else {
            return;
        };
        if msg.text().or_else(|| msg.caption()).is_none() {
            return;
        }
        if let Err(err) = memory
            .add_message(&user_id.to_string(), MemoryMessage::from_message(msg))
            .await
        {
            warn!(?err, user_id, "failed to buffer message to memory");
        }
    }

    /// Long-polls `source` until [`stop`](Self::stop) is called.
    pub async fn run_polling(&self, source: &dyn UpdateSource) -> Result<()> {
        self.set_running(true);
        info!("polling for updates");
        let mut offset = 0;
        let mut backoff = INITIAL_BACKOFF;

        while self.is_running() {
            match source.get_updates(offset, POLL_TIMEOUT_SECS).await {
                Ok(updates) => {
                    backoff = INITIAL_BACKOFF;
                    for update in updates {
                        offset = update.id + 1;
                        if let Err(err) = self.handle_update(update).await {
                            error!(?err, "failed to handle update");
                        }
                    }
                }
                Err(BotError::RateLimit { retry_after }) => {
                    let wait = retry_after.map_or(backoff, Duration::from_secs);
                    warn!(?wait, "rate limited by Telegram");
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    warn!(%err, ?backoff, "getUpdates failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
        info!("polling stopped");
        Ok(())
    }

    /// Stops polling and flushes buffered conversation memory.
    pub async fn stop(&self) {
        self.set_running(false);
        if let Some(memory) = &self.memory {
            memory.flush_all().await;
        }
        info!("bot stopped");
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PersistedIds {
    user: Option<i64>,
    chat: Option<i64>,
}
