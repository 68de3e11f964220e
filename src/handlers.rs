//! Typed update handlers and the factory that wires them to the processor.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use teloxide::types::{Message, Update, UpdateKind};
use tracing::{error, info, instrument};

use crate::error::BotError;
use crate::model::{MediaType, UpdateType};
use crate::processor::UpdateProcessor;
use crate::state::ContextStore;
use crate::telegram::{SendOptions, SentMessage, TelegramApi};
use crate::util::parse_command_args;

pub const COMMAND_ERROR_REPLY: &str = "Sorry, there was an error processing your command.";
pub const ADMIN_ONLY_REPLY: &str = "This command is for admins only.";
pub const UNKNOWN_CALLBACK_REPLY: &str = "Unknown action";

/// Everything a handler needs for one update.
#[derive(Clone)]
pub struct UpdateContext {
    pub update: Update,
    pub route: UpdateType,
    pub api: Arc<dyn TelegramApi>,
    pub store: Arc<ContextStore>,
}

impl UpdateContext {
    pub fn new(update: Update, api: Arc<dyn TelegramApi>, store: Arc<ContextStore>) -> Self {
        let route = UpdateType::route(&update);
        Self {
            update,
            route,
            api,
            store,
        }
    }

    /// The carried message for message-like updates (new, edited, channel).
    pub fn message(&self) -> Option<&Message> {
        match &self.update.kind {
            UpdateKind::Message(m)
            | UpdateKind::EditedMessage(m)
            | UpdateKind::ChannelPost(m)
            | UpdateKind::EditedChannelPost(m) => Some(m),
            _ => None,
        }
    }

    /// Text of a new message, if any.
    pub fn text(&self) -> Option<&str> {
        match &self.update.kind {
            UpdateKind::Message(m) => m.text(),
            _ => None,
        }
    }

    pub fn chat_id(&self) -> Option<i64> {
        self.update.chat().map(|c| c.id.0)
    }

    pub fn user_id(&self) -> Option<i64> {
        self.update.user().map(|u| u.id.0 as i64)
    }

    pub async fn reply(&self, text: &str) -> Result<SentMessage, BotError> {
        self.reply_with(text, SendOptions::default()).await
    }

    pub async fn reply_with(&self, text: &str, opts: SendOptions) -> Result<SentMessage, BotError> {
        let chat_id = self
            .chat_id()
            .ok_or_else(|| BotError::ChatNotFound("update carries no chat".into()))?;
        self.api.send_message(chat_id, text, opts).await
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    /// Returns whether the update was handled.
    async fn handle(&self, ctx: &UpdateContext) -> Result<bool>;
}

/// A registered callback taking the context plus one argument.
pub type Action<A> = Arc<dyn Fn(UpdateContext, A) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A middleware returning `false` to block the message.
pub type Middleware = Arc<dyn Fn(UpdateContext) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

pub fn action<A, F, Fut>(f: F) -> Action<A>
where
    A: 'static,
    F: Fn(UpdateContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |ctx, arg| Box::pin(f(ctx, arg)))
}

pub fn middleware<F, Fut>(f: F) -> Middleware
where
    F: Fn(UpdateContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(|e| e.into_inner()).clone()
}

async fn reply_error(ctx: &UpdateContext) {
    if let Err(err) = ctx.reply(COMMAND_ERROR_REPLY).await {
        error!(%err, "failed to send error reply");
    }
}

/// Text messages: middleware, then commands, then the default text action.
#[derive(Default)]
pub struct MessageHandler {
    commands: RwLock<HashMap<String, Action<Vec<String>>>>,
    middleware: RwLock<Vec<Middleware>>,
    text_action: RwLock<Option<Action<String>>>,
}

impl MessageHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_command(&self, command: &str, handler: Action<Vec<String>>) {
        self.commands
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(command.to_lowercase(), handler);
    }

    pub fn add_middleware(&self, mw: Middleware) {
        self.middleware
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(mw);
    }

    /// Replaces the default echo for non-command text.
    pub fn set_text_action(&self, handler: Action<String>) {
        *self.text_action.write().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }
}

#[async_trait]
impl Handler for MessageHandler {
    fn name(&self) -> &str {
        "message"
    }

    #[instrument(skip_all, fields(handler = "message"))]
    async fn handle(&self, ctx: &UpdateContext) -> Result<bool> {
        let Some(text) = ctx.text().map(str::to_string) else {
            return Ok(false);
        };

        for mw in read(&self.middleware) {
            match mw(ctx.clone()).await {
                Ok(false) => return Ok(false),
                Ok(true) => {}
                Err(err) => error!(?err, "middleware error"),
            }
        }

        if text.trim_start().starts_with('/') {
            let (command, args) = parse_command_args(text.trim());
            let handler = read(&self.commands).get(&command).cloned();
            if let Some(handler) = handler {
                if let Err(err) = handler(ctx.clone(), args).await {
                    error!(?err, %command, "command handler error");
                    reply_error(ctx).await;
                }
            }
            return Ok(true);
        }

        match read(&self.text_action) {
            Some(handler) => handler(ctx.clone(), text).await?,
            None => {
                ctx.reply(&format!("You said: {text}")).await?;
            }
        }
        Ok(true)
    }
}

/// Slash commands, with an admin-only tier.
pub struct CommandHandler {
    commands: RwLock<HashMap<String, Action<Vec<String>>>>,
    admin_commands: RwLock<HashMap<String, Action<Vec<String>>>>,
    admin_users: RwLock<Vec<i64>>,
}

impl CommandHandler {
    pub fn new(admin_users: Vec<i64>) -> Self {
        Self {
            commands: RwLock::default(),
            admin_commands: RwLock::default(),
            admin_users: RwLock::new(admin_users),
        }
    }

    pub fn register_command(&self, command: &str, handler: Action<Vec<String>>, admin_only: bool) {
        let map = if admin_only {
            &self.admin_commands
        } else {
            &self.commands
        };
        map.write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(command.to_lowercase(), handler);
    }

    pub fn set_admin_users(&self, users: Vec<i64>) {
        *self.admin_users.write().unwrap_or_else(|e| e.into_inner()) = users;
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        read(&self.admin_users).contains(&user_id)
    }

    /// Registered command names, regular first, each group sorted.
    pub fn command_names(&self) -> Vec<(String, bool)> {
        let mut regular: Vec<_> = read(&self.commands).into_keys().collect();
        let mut admin: Vec<_> = read(&self.admin_commands).into_keys().collect();
        regular.sort();
        admin.sort();
        regular
            .into_iter()
            .map(|c| (c, false))
            .chain(admin.into_iter().map(|c| (c, true)))
            .collect()
    }
}

#[async_trait]
impl Handler for CommandHandler {
    fn name(&self) -> &str {
        "command"
    }

    #[instrument(skip_all, fields(handler = "command"))]
    async fn handle(&self, ctx: &UpdateContext) -> Result<bool> {
        let Some(text) = ctx.text().map(str::trim) else {
            return Ok(false);
        };
        if !text.starts_with('/') {
            return Ok(false);
        }
        let (command, args) = parse_command_args(text);

        let admin = read(&self.admin_commands).get(&command).cloned();
        if let Some(handler) = admin {
            let allowed = ctx.user_id().map_or(false, |id| self.is_admin(id));
            if !allowed {
                ctx.reply(ADMIN_ONLY_REPLY).await?;
                return Ok(true);
            }
            if let Err(err) = handler(ctx.clone(), args).await {
                error!(?err, %command, "admin command error");
                reply_error(ctx).await;
            }
            return Ok(true);
        }

        let regular = read(&self.commands).get(&command).cloned();
        match regular {
            Some(handler) => {
                if let Err(err) = handler(ctx.clone(), args).await {
                    error!(?err, %command, "command error");
                    reply_error(ctx).await;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Inline keyboard callbacks matched by substring of the callback data.
#[derive(Default)]
pub struct CallbackHandler {
    callbacks: RwLock<Vec<(String, Action<String>)>>,
}

impl CallbackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_callback(&self, pattern: &str, handler: Action<String>) {
        let mut callbacks = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        callbacks.retain(|(p, _)| p != pattern);
        callbacks.push((pattern.to_string(), handler));
    }
}

#[async_trait]
impl Handler for CallbackHandler {
    fn name(&self) -> &str {
        "callback"
    }

    #[instrument(skip_all, fields(handler = "callback"))]
    async fn handle(&self, ctx: &UpdateContext) -> Result<bool> {
        let UpdateKind::CallbackQuery(query) = &ctx.update.kind else {
            return Ok(false);
        };
        let Some(data) = query.data.as_deref().filter(|d| !d.is_empty()) else {
            return Ok(false);
        };

        for (pattern, handler) in read(&self.callbacks) {
            if data.contains(&pattern) {
                match handler(ctx.clone(), data.to_string()).await {
                    Ok(()) => return Ok(true),
                    Err(err) => error!(?err, %pattern, "callback handler error"),
                }
            }
        }

        ctx.api
            .answer_callback_query(&query.id, Some(UNKNOWN_CALLBACK_REPLY), false)
            .await?;
        Ok(true)
    }
}

/// Inline queries matched by lower-cased prefix.
#[derive(Default)]
pub struct InlineHandler {
    handlers: RwLock<Vec<(String, Action<String>)>>,
}

impl InlineHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_inline_handler(&self, prefix: &str, handler: Action<String>) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((prefix.to_lowercase(), handler));
    }
}

#[async_trait]
impl Handler for InlineHandler {
    fn name(&self) -> &str {
        "inline"
    }

    async fn handle(&self, ctx: &UpdateContext) -> Result<bool> {
        let UpdateKind::InlineQuery(inline) = &ctx.update.kind else {
            return Ok(false);
        };
        let query = inline.query.to_lowercase();
        for (prefix, handler) in read(&self.handlers) {
            if query.starts_with(&prefix) {
                match handler(ctx.clone(), query.clone()).await {
                    Ok(()) => return Ok(true),
                    Err(err) => error!(?err, %prefix, "inline handler error"),
                }
            }
        }
        Ok(false)
    }
}

/// Photos, videos, documents and other media messages.
#[derive(Default)]
pub struct MediaHandler {
    handlers: RwLock<HashMap<MediaType, Action<MediaType>>>,
}

impl MediaHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_media_handler(&self, media: MediaType, handler: Action<MediaType>) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(media, handler);
    }

    async fn acknowledge(&self, ctx: &UpdateContext, msg: &Message, media: MediaType) -> Result<()> {
        info!(
            chat_id = msg.chat.id.0,
            media = media.as_str(),
            caption = msg.caption().unwrap_or_default(),
            "media received"
        );
        ctx.reply(&format!("✅ {} received!", media.title())).await?;
        Ok(())
    }
}

#[async_trait]
impl Handler for MediaHandler {
    fn name(&self) -> &str {
        "media"
    }

    #[instrument(skip_all, fields(handler = "media"))]
    async fn handle(&self, ctx: &UpdateContext) -> Result<bool> {
        let UpdateKind::Message(msg) = &ctx.update.kind else {
            return Ok(false);
        };
        let Some(media) = MediaType::of(msg) else {
            return Ok(false);
        };

        let handler = read(&self.handlers).get(&media).cloned();
        if let Some(handler) = handler {
            match handler(ctx.clone(), media).await {
                Ok(()) => return Ok(true),
                Err(err) => error!(?err, media = media.as_str(), "media handler error"),
            }
        }
        self.acknowledge(ctx, msg, media).await?;
        Ok(true)
    }
}

/// Member changes, the bot's own membership, and join requests. Callbacks
/// are keyed `chat_member`, `my_chat_member` and `join_request`.
#[derive(Default)]
pub struct ChatMemberHandler {
    handlers: RwLock<HashMap<String, Action<()>>>,
}

impl ChatMemberHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_member_handler(&self, event: &str, handler: Action<()>) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event.to_string(), handler);
    }

    async fn dispatch(&self, ctx: &UpdateContext, event: &str) -> Result<bool> {
        let handler = read(&self.handlers).get(event).cloned();
        if let Some(handler) = handler {
            handler(ctx.clone(), ()).await?;
        }
        Ok(true)
    }
}

#[async_trait]
impl Handler for ChatMemberHandler {
    fn name(&self) -> &str {
        "chat_member"
    }

    async fn handle(&self, ctx: &UpdateContext) -> Result<bool> {
        match &ctx.update.kind {
            UpdateKind::ChatMember(change) => {
                info!(chat_id = change.chat.id.0, user_id = change.new_chat_member.user.id.0, "chat member update");
                self.dispatch(ctx, "chat_member").await
            }
            UpdateKind::MyChatMember(change) => {
                info!(chat_id = change.chat.id.0, "my chat member update");
                self.dispatch(ctx, "my_chat_member").await
            }
            UpdateKind::ChatJoinRequest(req) => {
                info!(chat_id = req.chat.id.0, user_id = req.from.id.0, "chat join request");
                self.dispatch(ctx, "join_request").await
            }
            _ => Ok(false),
        }
    }
}

/// Poll state changes and answers. Callbacks are keyed `poll` and
/// `poll_answer`.
#[derive(Default)]
pub struct PollHandler {
    handlers: RwLock<HashMap<String, Action<()>>>,
}

impl PollHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_poll_handler(&self, kind: &str, handler: Action<()>) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind.to_string(), handler);
    }

    async fn dispatch(&self, ctx: &UpdateContext, kind: &str) -> Result<bool> {
        let handler = read(&self.handlers).get(kind).cloned();
        if let Some(handler) = handler {
            handler(ctx.clone(), ()).await?;
        }
        Ok(true)
    }
}

#[async_trait]
impl Handler for PollHandler {
    fn name(&self) -> &str {
        "poll"
    }

    async fn handle(&self, ctx: &UpdateContext) -> Result<bool> {
        match &ctx.update.kind {
            UpdateKind::Poll(poll) => {
                info!(question = %poll.question, "poll update");
                self.dispatch(ctx, "poll").await
            }
            UpdateKind::PollAnswer(answer) => {
                info!(user_id = answer.user.id.0, "poll answer");
                self.dispatch(ctx, "poll_answer").await
            }
            _ => Ok(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Message,
    Command,
    Callback,
    Inline,
    Media,
    ChatMember,
    Poll,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 7] = [
        HandlerKind::Message,
        HandlerKind::Command,
        HandlerKind::Callback,
        HandlerKind::Inline,
        HandlerKind::Media,
        HandlerKind::ChatMember,
        HandlerKind::Poll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Message => "message",
            HandlerKind::Command => "command",
            HandlerKind::Callback => "callback",
            HandlerKind::Inline => "inline",
            HandlerKind::Media => "media",
            HandlerKind::ChatMember => "chat_member",
            HandlerKind::Poll => "poll",
        }
    }

    pub fn parse_kind(s: &str) -> Option<HandlerKind> {
        HandlerKind::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    /// Update types this kind of handler serves.
    pub fn routes(&self) -> &'static [UpdateType] {
        match self {
            HandlerKind::Message | HandlerKind::Media => &[UpdateType::Message],
            HandlerKind::Command => &[UpdateType::Command],
            HandlerKind::Callback => &[UpdateType::CallbackQuery],
            HandlerKind::Inline => &[UpdateType::InlineQuery],
            HandlerKind::ChatMember => &[
                UpdateType::ChatMember,
                UpdateType::MyChatMember,
                UpdateType::ChatJoinRequest,
            ],
            HandlerKind::Poll => &[UpdateType::Poll, UpdateType::PollAnswer],
        }
    }
}

/// Creates the standard handlers and keeps typed access to each of them.
pub struct HandlerFactory {
    admin_users: Vec<i64>,
    message: Arc<MessageHandler>,
    command: Arc<CommandHandler>,
    callback: Arc<CallbackHandler>,
    inline: Arc<InlineHandler>,
    media: Arc<MediaHandler>,
    chat_member: Arc<ChatMemberHandler>,
    poll: Arc<PollHandler>,
    registered: Vec<(String, Arc<dyn Handler>)>,
}

impl HandlerFactory {
    pub fn new(admin_users: Vec<i64>) -> Self {
        Self {
            command: Arc::new(CommandHandler::new(admin_users.clone())),
            admin_users,
            message: Arc::new(MessageHandler::new()),
            callback: Arc::new(CallbackHandler::new()),
            inline: Arc::new(InlineHandler::new()),
            media: Arc::new(MediaHandler::new()),
            chat_member: Arc::new(ChatMemberHandler::new()),
            poll: Arc::new(PollHandler::new()),
            registered: Vec::new(),
        }
    }

    /// A fresh, unregistered handler of the named kind.
    pub fn create_handler(&self, kind: &str) -> Result<Arc<dyn Handler>> {
        let kind = HandlerKind::parse_kind(kind).ok_or_else(|| anyhow!("unknown handler type: {kind}"))?;
        let handler: Arc<dyn Handler> = match kind {
            HandlerKind::Message => Arc::new(MessageHandler::new()),
            HandlerKind::Command => Arc::new(CommandHandler::new(self.admin_users.clone())),
            HandlerKind::Callback => Arc::new(CallbackHandler::new()),
            HandlerKind::Inline => Arc::new(InlineHandler::new()),
            HandlerKind::Media => Arc::new(MediaHandler::new()),
            HandlerKind::ChatMember => Arc::new(ChatMemberHandler::new()),
            HandlerKind::Poll => Arc::new(PollHandler::new()),
        };
        Ok(handler)
    }

    /// Registers (or replaces) a handler under `name`.
    pub fn register_handler(&mut self, name: &str, handler: Arc<dyn Handler>) {
        self.registered.retain(|(n, _)| n != name);
        self.registered.push((name.to_string(), handler));
    }

    pub fn get_handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.registered
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, h)| h.clone())
    }

    fn standard(&self, kind: HandlerKind) -> Arc<dyn Handler> {
        match kind {
            HandlerKind::Message => self.message.clone(),
            HandlerKind::Command => self.command.clone(),
            HandlerKind::Callback => self.callback.clone(),
            HandlerKind::Inline => self.inline.clone(),
            HandlerKind::Media => self.media.clone(),
            HandlerKind::ChatMember => self.chat_member.clone(),
            HandlerKind::Poll => self.poll.clone(),
        }
    }

    /// Registers every standard handler under its kind name.
    pub fn create_all_handlers(&mut self) -> Vec<String> {
        for kind in HandlerKind::ALL {
            let handler = self.standard(kind);
            self.register_handler(kind.as_str(), handler);
        }
        self.registered.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Wires each registered standard handler to the update types it serves.
    /// Custom names are skipped; register those with the processor directly.
    pub fn attach(&self, processor: &mut UpdateProcessor) {
        for (name, handler) in &self.registered {
            let Some(kind) = HandlerKind::parse_kind(name) else {
                continue;
            };
            for route in kind.routes() {
                processor.register(*route, handler.clone());
            }
        }
    }

    pub fn message(&self) -> &Arc<MessageHandler> {
        &self.message
    }

    pub fn command(&self) -> &Arc<CommandHandler> {
        &self.command
    }

    pub fn callback(&self) -> &Arc<CallbackHandler> {
        &self.callback
    }

    pub fn inline(&self) -> &Arc<InlineHandler> {
        &self.inline
    }

    pub fn media(&self) -> &Arc<MediaHandler> {
        &self.media
    }

    pub fn chat_member(&self) -> &Arc<ChatMemberHandler> {
        &self.chat_member
    }

    pub fn poll(&self) -> &Arc<PollHandler> {
        &self.poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{self, message, update, user};
    use crate::telegram::recording::{Call, RecordingApi};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx(api: &Arc<RecordingApi>, upd: Update) -> UpdateContext {
        UpdateContext::new(upd, api.clone(), Arc::new(ContextStore::new()))
    }

    fn counter() -> (Arc<AtomicUsize>, Action<Vec<String>>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let act = action(move |_ctx, _args: Vec<String>| {
            let h = h.clone();
            async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        (hits, act)
    }

    #[tokio::test]
    async fn context_helpers() {
        let api = Arc::new(RecordingApi::default());
        let c = ctx(&api, fixtures::text_update(-10, 5, "/Help me"));
        assert_eq!(c.route, UpdateType::Command);
        assert_eq!(c.text(), Some("/Help me"));
        assert_eq!(c.chat_id(), Some(-10));
        assert_eq!(c.user_id(), Some(5));
        assert!(c.message().is_some());
        c.reply("pong").await.unwrap();
        assert_eq!(api.sent_texts(), vec!["pong"]);
    }

    #[tokio::test]
    async fn message_handler_echoes_plain_text() {
        let api = Arc::new(RecordingApi::default());
        let handler = MessageHandler::new();
        assert!(handler.handle(&ctx(&api, fixtures::text_update(1, 2, "hello"))).await.unwrap());
        assert_eq!(api.sent_texts(), vec!["You said: hello"]);
    }

    #[tokio::test]
    async fn echo_keeps_surrounding_whitespace() {
        let api = Arc::new(RecordingApi::default());
        let handler = MessageHandler::new();
        let update = fixtures::text_update(1, 2, "  spaced out\n");
        assert!(handler.handle(&ctx(&api, update)).await.unwrap());
        assert_eq!(api.sent_texts(), vec!["You said:   spaced out\n"]);
    }

    #[tokio::test]
    async fn message_handler_runs_commands_and_reports_errors() {
        let api = Arc::new(RecordingApi::default());
        let handler = MessageHandler::new();
        let (hits, act) = counter();
        handler.register_command("Ping", act);
        handler.register_command(
            "boom",
            action(|_ctx, _args: Vec<String>| async { Err(anyhow!("exploded")) }),
        );

        assert!(handler.handle(&ctx(&api, fixtures::text_update(1, 2, "/ping@bot"))).await.unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(handler.handle(&ctx(&api, fixtures::text_update(1, 2, "/boom"))).await.unwrap());
        assert_eq!(api.sent_texts(), vec![COMMAND_ERROR_REPLY]);

        // Unknown commands are swallowed without a reply.
        assert!(handler.handle(&ctx(&api, fixtures::text_update(1, 2, "/nope"))).await.unwrap());
        assert_eq!(api.sent_texts().len(), 1);
    }

    #[tokio::test]
    async fn middleware_can_block_and_errors_are_skipped() {
        let api = Arc::new(RecordingApi::default());
        let handler = MessageHandler::new();
        handler.add_middleware(middleware(|_ctx| async { Err(anyhow!("broken")) }));
        handler.add_middleware(middleware(|ctx: UpdateContext| async move {
            Ok(ctx.text() != Some("spam"))
        }));

        assert!(!handler.handle(&ctx(&api, fixtures::text_update(1, 2, "spam"))).await.unwrap());
        assert!(handler.handle(&ctx(&api, fixtures::text_update(1, 2, "ham"))).await.unwrap());
        assert_eq!(api.sent_texts(), vec!["You said: ham"]);
    }

    #[tokio::test]
    async fn message_handler_ignores_non_text() {
        let api = Arc::new(RecordingApi::default());
        let handler = MessageHandler::new();
        let cb = update(json!({
            "callback_query": { "id": "1", "from": user(2), "chat_instance": "c", "data": "x" }
        }));
        assert!(!handler.handle(&ctx(&api, cb)).await.unwrap());
    }

    #[tokio::test]
    async fn admin_commands_are_gated() {
        let api = Arc::new(RecordingApi::default());
        let handler = CommandHandler::new(vec![99]);
        let (hits, act) = counter();
        handler.register_command("stats", act, true);

        assert!(handler.handle(&ctx(&api, fixtures::text_update(1, 2, "/stats"))).await.unwrap());
        assert_eq!(api.sent_texts(), vec![ADMIN_ONLY_REPLY]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert!(handler.handle(&ctx(&api, fixtures::text_update(1, 99, "/stats"))).await.unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        handler.set_admin_users(vec![2]);
        assert!(handler.handle(&ctx(&api, fixtures::text_update(1, 2, "/stats"))).await.unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn command_handler_unknown_and_failing() {
        let api = Arc::new(RecordingApi::default());
        let handler = CommandHandler::new(vec![]);
        handler.register_command(
            "fail",
            action(|_ctx, _args: Vec<String>| async { Err(anyhow!("nope")) }),
            false,
        );
        assert!(!handler.handle(&ctx(&api, fixtures::text_update(1, 2, "/unknown"))).await.unwrap());
        assert!(!handler.handle(&ctx(&api, fixtures::text_update(1, 2, "plain"))).await.unwrap());
        assert!(handler.handle(&ctx(&api, fixtures::text_update(1, 2, "/fail"))).await.unwrap());
        assert_eq!(api.sent_texts(), vec![COMMAND_ERROR_REPLY]);
        assert_eq!(handler.command_names(), vec![("fail".to_string(), false)]);
    }

    #[tokio::test]
    async fn callbacks_match_by_substring() {
        let api = Arc::new(RecordingApi::default());
        let handler = CallbackHandler::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        handler.register_callback(
            "menu:",
            action(move |_ctx, data: String| {
                let s = s.clone();
                async move {
                    s.lock().unwrap().push(data);
                    Ok(())
                }
            }),
        );

        let cb = |data: &str| {
            update(json!({
                "callback_query": { "id": "cb1", "from": user(2), "chat_instance": "c", "data": data }
            }))
        };
        assert!(handler.handle(&ctx(&api, cb("open menu:settings"))).await.unwrap());
        assert_eq!(*seen.lock().unwrap(), vec!["open menu:settings"]);

        assert!(handler.handle(&ctx(&api, cb("other"))).await.unwrap());
        assert_eq!(
            api.calls(),
            vec![Call::Answer {
                id: "cb1".into(),
                text: Some(UNKNOWN_CALLBACK_REPLY.into())
            }]
        );

        let empty = update(json!({
            "callback_query": { "id": "cb2", "from": user(2), "chat_instance": "c" }
        }));
        assert!(!handler.handle(&ctx(&api, empty)).await.unwrap());
    }

    #[tokio::test]
    async fn inline_prefixes_are_case_insensitive() {
        let api = Arc::new(RecordingApi::default());
        let handler = InlineHandler::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        handler.register_inline_handler(
            "Weather",
            action(move |_ctx, query: String| {
                let s = s.clone();
                async move {
                    s.lock().unwrap().push(query);
                    Ok(())
                }
            }),
        );
        let q = |text: &str| {
            update(json!({
                "inline_query": { "id": "q", "from": user(2), "query": text, "offset": "" }
            }))
        };
        assert!(handler.handle(&ctx(&api, q("WEATHER Oslo"))).await.unwrap());
        assert!(!handler.handle(&ctx(&api, q("news"))).await.unwrap());
        assert_eq!(*seen.lock().unwrap(), vec!["weather oslo"]);
    }

    #[tokio::test]
    async fn media_default_acknowledges() {
        let api = Arc::new(RecordingApi::default());
        let handler = MediaHandler::new();
        let voice = update(json!({
            "message": message(1, 2, json!({
                "voice": { "file_id": "v1", "file_unique_id": "u1", "duration": 3 }
            }))
        }));
        assert!(handler.handle(&ctx(&api, voice.clone())).await.unwrap());
        assert_eq!(api.sent_texts(), vec!["✅ Voice received!"]);

        let (hits, _) = counter();
        let h = hits.clone();
        handler.register_media_handler(
            MediaType::Voice,
            action(move |_ctx, _m: MediaType| {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        assert!(handler.handle(&ctx(&api, voice)).await.unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(api.sent_texts().len(), 1);

        assert!(!handler.handle(&ctx(&api, fixtures::text_update(1, 2, "text"))).await.unwrap());
    }

    #[tokio::test]
    async fn poll_events_dispatch() {
        let api = Arc::new(RecordingApi::default());
        let handler = PollHandler::new();
        let (hits, _) = counter();
        let h = hits.clone();
        handler.register_poll_handler(
            "poll_answer",
            action(move |_ctx, _: ()| {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );
        let answer = update(json!({
            "poll_answer": { "poll_id": "p1", "user": user(2), "option_ids": [1] }
        }));
        assert!(handler.handle(&ctx(&api, answer)).await.unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!handler.handle(&ctx(&api, fixtures::text_update(1, 2, "x"))).await.unwrap());
    }

    #[test]
    fn factory_creates_known_kinds_only() {
        let mut factory = HandlerFactory::new(vec![1]);
        assert_eq!(factory.create_handler("media").unwrap().name(), "media");
        assert!(factory.create_handler("webhook").is_err());

        let names = factory.create_all_handlers();
        assert_eq!(names.len(), 7);
        assert_eq!(factory.get_handler("chat_member").unwrap().name(), "chat_member");
        assert!(factory.get_handler("custom").is_none());

        let mut processor = UpdateProcessor::new();
        factory.attach(&mut processor);
        assert_eq!(processor.handler_count(UpdateType::Message), 2);
        assert_eq!(processor.handler_count(UpdateType::Command), 1);
        assert_eq!(processor.handler_count(UpdateType::PollAnswer), 1);
        assert_eq!(processor.handler_count(UpdateType::ChatJoinRequest), 1);
        assert_eq!(processor.handler_count(UpdateType::ShippingQuery), 0);
    }
}
