//! The Telegram API seam used by handlers, its teloxide implementation, and
//! webhook management.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use teloxide::payloads::setters::*;
use teloxide::prelude::*;
use teloxide::types::{
    Chat, ChatAction, ChatMember, ChatPermissions, DiceEmoji, InlineKeyboardMarkup, InputFile,
    Message, MessageId, ParseMode as TgParseMode, PollType, ReplyMarkup, Update,
    UserProfilePhotos,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::db::{self, LogLevel, Pool};
use crate::error::BotError;
use crate::keyboard::Keyboard;
use crate::model::MediaType;

const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(50);
const WEBHOOK_MAX_CONNECTIONS: u8 = 40;
const MAX_CAPTION_CHARS: usize = 1024;
const MAX_POLL_QUESTION_CHARS: usize = 300;
const MAX_POLL_OPTION_CHARS: usize = 100;
const MAX_CHAT_TITLE_CHARS: usize = 128;
const MAX_CHAT_DESCRIPTION_CHARS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Markdown,
    MarkdownV2,
    Html,
}

impl ParseMode {
    #[allow(deprecated)]
    fn to_teloxide(self) -> TgParseMode {
        match self {
            ParseMode::Markdown => TgParseMode::Markdown,
            ParseMode::MarkdownV2 => TgParseMode::MarkdownV2,
            ParseMode::Html => TgParseMode::Html,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub parse_mode: Option<ParseMode>,
    pub reply_markup: Option<Keyboard>,
    pub reply_to: Option<i32>,
    pub disable_notification: bool,
    pub disable_web_page_preview: bool,
}

impl SendOptions {
    pub fn markdown() -> Self {
        Self {
            parse_mode: Some(ParseMode::Markdown),
            ..Default::default()
        }
    }

    pub fn with_markup(mut self, markup: impl Into<Keyboard>) -> Self {
        self.reply_markup = Some(markup.into());
        self
    }

    pub fn reply_to(mut self, message_id: i32) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SentMessage {
    pub chat_id: i64,
    pub message_id: i32,
}

/// Where an uploaded file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// A `file_id` Telegram already knows.
    Id(String),
    Url(reqwest::Url),
    Path(PathBuf),
    Memory { name: String, data: Vec<u8> },
}

impl FileSource {
    /// `http(s)://` links become URLs, existing local files paths, and
    /// anything else is taken as a file id.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            if let Ok(url) = reqwest::Url::parse(raw) {
                return FileSource::Url(url);
            }
        }
        let path = Path::new(raw);
        if path.is_file() {
            return FileSource::Path(path.to_path_buf());
        }
        FileSource::Id(raw.to_string())
    }

    pub fn describe(&self) -> String {
        match self {
            FileSource::Id(id) => id.clone(),
            FileSource::Url(url) => url.to_string(),
            FileSource::Path(path) => path.display().to_string(),
            FileSource::Memory { name, .. } => name.clone(),
        }
    }

    fn into_input_file(self) -> Result<InputFile, BotError> {
        match self {
            FileSource::Id(id) if id.trim().is_empty() => {
                Err(BotError::File("file id is empty".into()))
            }
            FileSource::Id(id) => Ok(InputFile::file_id(id)),
            FileSource::Url(url) => Ok(InputFile::url(url)),
            FileSource::Path(path) if !path.is_file() => Err(BotError::File(format!(
                "file not found: {}",
                path.display()
            ))),
            FileSource::Path(path) => Ok(InputFile::file(path)),
            FileSource::Memory { data, .. } if data.is_empty() => {
                Err(BotError::File("file is empty".into()))
            }
            FileSource::Memory { name, data } => Ok(InputFile::memory(data).file_name(name)),
        }
    }
}

/// A regular poll, or a quiz when `correct_option` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollSpec {
    pub question: String,
    pub options: Vec<String>,
    pub is_anonymous: bool,
    pub allows_multiple_answers: bool,
    pub correct_option: Option<u8>,
    pub explanation: Option<String>,
    pub open_period: Option<u16>,
}

impl PollSpec {
    pub fn new(
        question: impl Into<String>,
        options: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            question: question.into(),
            options: options.into_iter().map(Into::into).collect(),
            is_anonymous: true,
            allows_multiple_answers: false,
            correct_option: None,
            explanation: None,
            open_period: None,
        }
    }

    pub fn quiz(mut self, correct_option: u8) -> Self {
        self.correct_option = Some(correct_option);
        self
    }

    pub fn validate(&self) -> Result<(), BotError> {
        let question = self.question.trim().chars().count();
        if question == 0 || question > MAX_POLL_QUESTION_CHARS {
            return Err(BotError::Validation(format!(
                "poll question must be 1-{MAX_POLL_QUESTION_CHARS} characters"
            )));
        }
        if !(2..=10).contains(&self.options.len()) {
            return Err(BotError::Validation("a poll needs 2-10 options".into()));
        }
        if let Some(bad) = self.options.iter().find(|o| {
            let n = o.trim().chars().count();
            n == 0 || n > MAX_POLL_OPTION_CHARS
        }) {
            return Err(BotError::Validation(format!(
                "poll option {bad:?} must be 1-{MAX_POLL_OPTION_CHARS} characters"
            )));
        }
        if let Some(correct) = self.correct_option {
            if usize::from(correct) >= self.options.len() {
                return Err(BotError::Validation(format!(
                    "correct option {correct} is out of range"
                )));
            }
            if self.allows_multiple_answers {
                return Err(BotError::Validation(
                    "quizzes cannot allow multiple answers".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueInfo {
    pub latitude: f64,
    pub longitude: f64,
    pub title: String,
    pub address: String,
    pub foursquare_id: Option<String>,
    pub google_place_id: Option<String>,
}

/// Administrator rights granted by `promote_chat_member`. All false demotes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdminRights {
    pub is_anonymous: bool,
    pub can_manage_chat: bool,
    pub can_post_messages: bool,
    pub can_edit_messages: bool,
    pub can_delete_messages: bool,
    pub can_manage_video_chats: bool,
    pub can_restrict_members: bool,
    pub can_promote_members: bool,
    pub can_change_info: bool,
    pub can_invite_users: bool,
    pub can_pin_messages: bool,
    pub can_manage_topics: bool,
}

fn unsupported(method: &str) -> BotError {
    BotError::api(format!("{method} is not supported by this client"), None)
}

/// Outgoing Bot API calls made by handlers.
///
/// Everything past `answer_callback_query` has a default body that fails
/// with an `Api` error, so narrow fakes only implement what they use.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError>;

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        opts: SendOptions,
    ) -> Result<(), BotError>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), BotError>;

    async fn forward_message(
        &self,
        to_chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
    ) -> Result<SentMessage, BotError>;

    async fn send_chat_action(&self, chat_id: i64, action: ChatAction) -> Result<(), BotError>;

    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), BotError>;

    async fn copy_message(
        &self,
        _to_chat_id: i64,
        _from_chat_id: i64,
        _message_id: i32,
        _caption: Option<&str>,
        _opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        Err(unsupported("copyMessage"))
    }

    /// Sends any [`MediaType`]; stickers and video notes take no caption.
    async fn send_media(
        &self,
        _chat_id: i64,
        _kind: MediaType,
        _file: FileSource,
        _caption: Option<&str>,
        _opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        Err(unsupported("sendMedia"))
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        file: FileSource,
        caption: Option<&str>,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        self.send_media(chat_id, MediaType::Photo, file, caption, opts)
            .await
    }

    async fn send_audio(
        &self,
        chat_id: i64,
        file: FileSource,
        caption: Option<&str>,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        self.send_media(chat_id, MediaType::Audio, file, caption, opts)
            .await
    }

    async fn send_document(
        &self,
        chat_id: i64,
        file: FileSource,
        caption: Option<&str>,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        self.send_media(chat_id, MediaType::Document, file, caption, opts)
            .await
    }

    async fn send_video(
        &self,
        chat_id: i64,
        file: FileSource,
        caption: Option<&str>,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        self.send_media(chat_id, MediaType::Video, file, caption, opts)
            .await
    }

    async fn send_voice(
        &self,
        chat_id: i64,
        file: FileSource,
        caption: Option<&str>,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        self.send_media(chat_id, MediaType::Voice, file, caption, opts)
            .await
    }

    async fn send_location(
        &self,
        _chat_id: i64,
        _latitude: f64,
        _longitude: f64,
        _opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        Err(unsupported("sendLocation"))
    }

    async fn send_venue(
        &self,
        _chat_id: i64,
        _venue: &VenueInfo,
        _opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        Err(unsupported("sendVenue"))
    }

    async fn send_contact(
        &self,
        _chat_id: i64,
        _phone_number: &str,
        _first_name: &str,
        _last_name: Option<&str>,
        _opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        Err(unsupported("sendContact"))
    }

    async fn send_poll(
        &self,
        _chat_id: i64,
        _poll: &PollSpec,
        _opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        Err(unsupported("sendPoll"))
    }

    async fn send_dice(
        &self,
        _chat_id: i64,
        _emoji: DiceEmoji,
        _opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        Err(unsupported("sendDice"))
    }

    async fn get_chat(&self, _chat_id: i64) -> Result<Chat, BotError> {
        Err(unsupported("getChat"))
    }

    async fn get_chat_member(&self, _chat_id: i64, _user_id: i64) -> Result<ChatMember, BotError> {
        Err(unsupported("getChatMember"))
    }

    async fn get_chat_administrators(&self, _chat_id: i64) -> Result<Vec<ChatMember>, BotError> {
        Err(unsupported("getChatAdministrators"))
    }

    async fn get_chat_member_count(&self, _chat_id: i64) -> Result<u32, BotError> {
        Err(unsupported("getChatMemberCount"))
    }

    async fn get_user_profile_photos(
        &self,
        _user_id: i64,
        _offset: Option<u32>,
        _limit: Option<u8>,
    ) -> Result<UserProfilePhotos, BotError> {
        Err(unsupported("getUserProfilePhotos"))
    }

    async fn leave_chat(&self, _chat_id: i64) -> Result<(), BotError> {
        Err(unsupported("leaveChat"))
    }

    async fn ban_chat_member(
        &self,
        _chat_id: i64,
        _user_id: i64,
        _until: Option<DateTime<Utc>>,
        _revoke_messages: bool,
    ) -> Result<(), BotError> {
        Err(unsupported("banChatMember"))
    }

    async fn unban_chat_member(
        &self,
        _chat_id: i64,
        _user_id: i64,
        _only_if_banned: bool,
    ) -> Result<(), BotError> {
        Err(unsupported("unbanChatMember"))
    }

    async fn restrict_chat_member(
        &self,
        _chat_id: i64,
        _user_id: i64,
        _permissions: ChatPermissions,
        _until: Option<DateTime<Utc>>,
    ) -> Result<(), BotError> {
        Err(unsupported("restrictChatMember"))
    }

    async fn promote_chat_member(
        &self,
        _chat_id: i64,
        _user_id: i64,
        _rights: AdminRights,
    ) -> Result<(), BotError> {
        Err(unsupported("promoteChatMember"))
    }

    async fn set_chat_photo(&self, _chat_id: i64, _photo: FileSource) -> Result<(), BotError> {
        Err(unsupported("setChatPhoto"))
    }

    async fn delete_chat_photo(&self, _chat_id: i64) -> Result<(), BotError> {
        Err(unsupported("deleteChatPhoto"))
    }

    async fn set_chat_title(&self, _chat_id: i64, _title: &str) -> Result<(), BotError> {
        Err(unsupported("setChatTitle"))
    }

    /// `None` clears the description.
    async fn set_chat_description(
        &self,
        _chat_id: i64,
        _description: Option<&str>,
    ) -> Result<(), BotError> {
        Err(unsupported("setChatDescription"))
    }

    async fn pin_chat_message(
        &self,
        _chat_id: i64,
        _message_id: i32,
        _disable_notification: bool,
    ) -> Result<(), BotError> {
        Err(unsupported("pinChatMessage"))
    }

    /// `None` unpins the most recent pinned message.
    async fn unpin_chat_message(
        &self,
        _chat_id: i64,
        _message_id: Option<i32>,
    ) -> Result<(), BotError> {
        Err(unsupported("unpinChatMessage"))
    }

    async fn unpin_all_chat_messages(&self, _chat_id: i64) -> Result<(), BotError> {
        Err(unsupported("unpinAllChatMessages"))
    }
}

/// Long-polling source of updates.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn get_updates(&self, offset: i32, timeout_secs: u32) -> Result<Vec<Update>, BotError>;
}

fn validate_text(text: &str) -> Result<(), BotError> {
    if text.trim().is_empty() {
        return Err(BotError::Validation("message text is empty".into()));
    }
    Ok(())
}

fn validate_caption(caption: Option<&str>) -> Result<(), BotError> {
    match caption {
        Some(c) if c.chars().count() > MAX_CAPTION_CHARS => Err(BotError::Validation(format!(
            "caption is longer than {MAX_CAPTION_CHARS} characters"
        ))),
        _ => Ok(()),
    }
}

fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), BotError> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(BotError::Validation(format!(
            "coordinates out of range: {latitude}, {longitude}"
        )));
    }
    Ok(())
}

fn user_id(id: i64) -> Result<UserId, BotError> {
    u64::try_from(id)
        .map(UserId)
        .map_err(|_| BotError::Validation(format!("invalid user id {id}")))
}

fn reply_markup(kb: &Keyboard) -> Result<ReplyMarkup, BotError> {
    kb.to_markup()
        .map_err(|e| BotError::Validation(format!("invalid keyboard: {e}")))
}

fn inline_markup(kb: &Keyboard) -> Result<InlineKeyboardMarkup, BotError> {
    match kb {
        Keyboard::Inline(_) => serde_json::from_value(kb.to_json())
            .map_err(|e| BotError::Validation(format!("invalid inline keyboard: {e}"))),
        Keyboard::Reply(_) => Err(BotError::Validation(
            "only inline keyboards can be attached to edited messages".into(),
        )),
    }
}

/// Applies markup, reply target and notification flags shared by every send.
macro_rules! with_send_options {
    ($req:expr, $opts:expr) => {{
        let mut req = $req;
        if let Some(kb) = &$opts.reply_markup {
            req = req.reply_markup(reply_markup(kb)?);
        }
        if let Some(id) = $opts.reply_to {
            req = req.reply_to_message_id(MessageId(id));
        }
        if $opts.disable_notification {
            req = req.disable_notification(true);
        }
        req
    }};
}

macro_rules! with_caption {
    ($req:expr, $caption:expr, $opts:expr) => {{
        let mut req = $req;
        if let Some(caption) = $caption {
            req = req.caption(caption);
        }
        if let Some(mode) = $opts.parse_mode {
            req = req.parse_mode(mode.to_teloxide());
        }
        req
    }};
}

fn sent(msg: &Message) -> SentMessage {
    SentMessage {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
    }
}

/// [`TelegramApi`] over a teloxide [`Bot`], spacing requests by a small
/// fixed interval.
#[derive(Clone)]
pub struct TeloxideApi {
    bot: Bot,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl TeloxideApi {
    pub fn new(token: &str) -> Self {
        Self::from_bot(Bot::new(token))
    }

    pub fn from_bot(bot: Bot) -> Self {
        Self {
            bot,
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < MIN_REQUEST_INTERVAL {
                tokio::time::sleep(MIN_REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl TelegramApi for TeloxideApi {
    #[instrument(skip_all, fields(chat_id = chat_id))]
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        validate_text(text)?;
        self.pace().await;
        let mut req = self.bot.send_message(ChatId(chat_id), text);
        if let Some(mode) = opts.parse_mode {
            req = req.parse_mode(mode.to_teloxide());
        }
        let mut req = with_send_options!(req, opts);
        if opts.disable_web_page_preview {
            req = req.disable_web_page_preview(true);
        }
        let msg = req.await?;
        Ok(sent(&msg))
    }

    #[instrument(skip_all, fields(chat_id = chat_id, message_id = message_id))]
    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        opts: SendOptions,
    ) -> Result<(), BotError> {
        validate_text(text)?;
        self.pace().await;
        let mut req = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text);
        if let Some(mode) = opts.parse_mode {
            req = req.parse_mode(mode.to_teloxide());
        }
        if let Some(kb) = &opts.reply_markup {
            req = req.reply_markup(inline_markup(kb)?);
        }
        if opts.disable_web_page_preview {
            req = req.disable_web_page_preview(true);
        }
        req.await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), BotError> {
        self.pace().await;
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await?;
        Ok(())
    }

    async fn forward_message(
        &self,
        to_chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
    ) -> Result<SentMessage, BotError> {
        self.pace().await;
        let msg = self
            .bot
            .forward_message(ChatId(to_chat_id), ChatId(from_chat_id), MessageId(message_id))
            .await?;
        Ok(sent(&msg))
    }

    async fn send_chat_action(&self, chat_id: i64, action: ChatAction) -> Result<(), BotError> {
        self.bot.send_chat_action(ChatId(chat_id), action).await?;
        Ok(())
    }

    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), BotError> {
        let mut req = self.bot.answer_callback_query(callback_id.to_string());
        if let Some(text) = text {
            req = req.text(text);
        }
        if show_alert {
            req = req.show_alert(true);
        }
        req.await?;
        Ok(())
    }

    async fn copy_message(
        &self,
        to_chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
        caption: Option<&str>,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        validate_caption(caption)?;
        self.pace().await;
        let req = self.bot.copy_message(
            ChatId(to_chat_id),
            ChatId(from_chat_id),
            MessageId(message_id),
        );
        let req = with_caption!(req, caption, opts);
        let copied = with_send_options!(req, opts).await?;
        Ok(SentMessage {
            chat_id: to_chat_id,
            message_id: copied.0,
        })
    }

    #[instrument(skip_all, fields(chat_id = chat_id, kind = kind.as_str()))]
    async fn send_media(
        &self,
        chat_id: i64,
        kind: MediaType,
        file: FileSource,
        caption: Option<&str>,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        validate_caption(caption)?;
        if caption.is_some() && matches!(kind, MediaType::Sticker | MediaType::VideoNote) {
            return Err(BotError::Validation(format!(
                "{} messages cannot carry a caption",
                kind.as_str()
            )));
        }
        let file = file.into_input_file()?;
        self.pace().await;
        let chat = ChatId(chat_id);
        let msg = match kind {
            MediaType::Photo => {
                let req = with_caption!(self.bot.send_photo(chat, file), caption, opts);
                with_send_options!(req, opts).await?
            }
            MediaType::Audio => {
                let req = with_caption!(self.bot.send_audio(chat, file), caption, opts);
                with_send_options!(req, opts).await?
            }
            MediaType::Video => {
                let req = with_caption!(self.bot.send_video(chat, file), caption, opts);
                with_send_options!(req, opts).await?
            }
            MediaType::Voice => {
                let req = with_caption!(self.bot.send_voice(chat, file), caption, opts);
                with_send_options!(req, opts).await?
            }
            MediaType::Document => {
                let req = with_caption!(self.bot.send_document(chat, file), caption, opts);
                with_send_options!(req, opts).await?
            }
            MediaType::Animation => {
                let req = with_caption!(self.bot.send_animation(chat, file), caption, opts);
                with_send_options!(req, opts).await?
            }
            MediaType::VideoNote => with_send_options!(self.bot.send_video_note(chat, file), opts)
                .await?,
            MediaType::Sticker => {
                // sendSticker takes a bare integer reply target.
                let mut req = self.bot.send_sticker(chat, file);
                if let Some(kb) = &opts.reply_markup {
                    req = req.reply_markup(reply_markup(kb)?);
                }
                if let Some(id) = opts.reply_to {
                    req = req.reply_to_message_id(id);
                }
                if opts.disable_notification {
                    req = req.disable_notification(true);
                }
                req.await?
            }
        };
        Ok(sent(&msg))
    }

    async fn send_location(
        &self,
        chat_id: i64,
        latitude: f64,
        longitude: f64,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        validate_coordinates(latitude, longitude)?;
        self.pace().await;
        let req = self.bot.send_location(ChatId(chat_id), latitude, longitude);
        let msg = with_send_options!(req, opts).await?;
        Ok(sent(&msg))
    }

    async fn send_venue(
        &self,
        chat_id: i64,
        venue: &VenueInfo,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        validate_coordinates(venue.latitude, venue.longitude)?;
        if venue.title.trim().is_empty() || venue.address.trim().is_empty() {
            return Err(BotError::Validation(
                "venue needs a title and an address".into(),
            ));
        }
        self.pace().await;
        let mut req = self.bot.send_venue(
            ChatId(chat_id),
            venue.latitude,
            venue.longitude,
            venue.title.as_str(),
            venue.address.as_str(),
        );
        if let Some(id) = &venue.foursquare_id {
            req = req.foursquare_id(id.as_str());
        }
        if let Some(id) = &venue.google_place_id {
            req = req.google_place_id(id.as_str());
        }
        let msg = with_send_options!(req, opts).await?;
        Ok(sent(&msg))
    }

    async fn send_contact(
        &self,
        chat_id: i64,
        phone_number: &str,
        first_name: &str,
        last_name: Option<&str>,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        if phone_number.trim().is_empty() || first_name.trim().is_empty() {
            return Err(BotError::Validation(
                "contact needs a phone number and a first name".into(),
            ));
        }
        self.pace().await;
        let mut req = self
            .bot
            .send_contact(ChatId(chat_id), phone_number, first_name);
        if let Some(last) = last_name {
            req = req.last_name(last);
        }
        let msg = with_send_options!(req, opts).await?;
        Ok(sent(&msg))
    }

    #[instrument(skip_all, fields(chat_id = chat_id))]
    async fn send_poll(
        &self,
        chat_id: i64,
        poll: &PollSpec,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        poll.validate()?;
        self.pace().await;
        let mut req = self
            .bot
            .send_poll(ChatId(chat_id), poll.question.as_str(), poll.options.clone())
            .is_anonymous(poll.is_anonymous)
            .allows_multiple_answers(poll.allows_multiple_answers);
        if let Some(correct) = poll.correct_option {
            req = req.type_(PollType::Quiz).correct_option_id(correct);
        }
        if let Some(explanation) = &poll.explanation {
            req = req.explanation(explanation.as_str());
        }
        if let Some(period) = poll.open_period {
            req = req.open_period(period);
        }
        let msg = with_send_options!(req, opts).await?;
        Ok(sent(&msg))
    }

    async fn send_dice(
        &self,
        chat_id: i64,
        emoji: DiceEmoji,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        self.pace().await;
        let req = self.bot.send_dice(ChatId(chat_id)).emoji(emoji);
        let msg = with_send_options!(req, opts).await?;
        Ok(sent(&msg))
    }

    async fn get_chat(&self, chat_id: i64) -> Result<Chat, BotError> {
        self.pace().await;
        Ok(self.bot.get_chat(ChatId(chat_id)).await?)
    }

    async fn get_chat_member(&self, chat_id: i64, user: i64) -> Result<ChatMember, BotError> {
        let user = user_id(user)?;
        self.pace().await;
        Ok(self.bot.get_chat_member(ChatId(chat_id), user).await?)
    }

    async fn get_chat_administrators(&self, chat_id: i64) -> Result<Vec<ChatMember>, BotError> {
        self.pace().await;
        Ok(self.bot.get_chat_administrators(ChatId(chat_id)).await?)
    }

    async fn get_chat_member_count(&self, chat_id: i64) -> Result<u32, BotError> {
        self.pace().await;
        Ok(self.bot.get_chat_member_count(ChatId(chat_id)).await?)
    }

    async fn get_user_profile_photos(
        &self,
        user: i64,
        offset: Option<u32>,
        limit: Option<u8>,
    ) -> Result<UserProfilePhotos, BotError> {
        let user = user_id(user)?;
        if let Some(limit) = limit.filter(|l| !(1..=100).contains(l)) {
            return Err(BotError::Validation(format!(
                "profile photo limit {limit} is outside 1-100"
            )));
        }
        self.pace().await;
        let mut req = self.bot.get_user_profile_photos(user);
        if let Some(offset) = offset {
            req = req.offset(offset);
        }
        if let Some(limit) = limit {
            req = req.limit(limit);
        }
        Ok(req.await?)
    }

    #[instrument(skip_all, fields(chat_id = chat_id))]
    async fn leave_chat(&self, chat_id: i64) -> Result<(), BotError> {
        self.pace().await;
        self.bot.leave_chat(ChatId(chat_id)).await?;
        info!("left chat");
        Ok(())
    }

    #[instrument(skip_all, fields(chat_id = chat_id, user_id = user))]
    async fn ban_chat_member(
        &self,
        chat_id: i64,
        user: i64,
        until: Option<DateTime<Utc>>,
        revoke_messages: bool,
    ) -> Result<(), BotError> {
        let user = user_id(user)?;
        self.pace().await;
        let mut req = self
            .bot
            .ban_chat_member(ChatId(chat_id), user)
            .revoke_messages(revoke_messages);
        if let Some(until) = until {
            req = req.until_date(until);
        }
        req.await?;
        Ok(())
    }

    #[instrument(skip_all, fields(chat_id = chat_id, user_id = user))]
    async fn unban_chat_member(
        &self,
        chat_id: i64,
        user: i64,
        only_if_banned: bool,
    ) -> Result<(), BotError> {
        let user = user_id(user)?;
        self.pace().await;
        self.bot
            .unban_chat_member(ChatId(chat_id), user)
            .only_if_banned(only_if_banned)
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(chat_id = chat_id, user_id = user))]
    async fn restrict_chat_member(
        &self,
        chat_id: i64,
        user: i64,
        permissions: ChatPermissions,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), BotError> {
        let user = user_id(user)?;
        self.pace().await;
        let mut req = self
            .bot
            .restrict_chat_member(ChatId(chat_id), user, permissions);
        if let Some(until) = until {
            req = req.until_date(until);
        }
        req.await?;
        Ok(())
    }

    #[instrument(skip_all, fields(chat_id = chat_id, user_id = user))]
    async fn promote_chat_member(
        &self,
        chat_id: i64,
        user: i64,
        rights: AdminRights,
    ) -> Result<(), BotError> {
        let user = user_id(user)?;
        self.pace().await;
        self.bot
            .promote_chat_member(ChatId(chat_id), user)
            .is_anonymous(rights.is_anonymous)
            .can_manage_chat(rights.can_manage_chat)
            .can_post_messages(rights.can_post_messages)
            .can_edit_messages(rights.can_edit_messages)
            .can_delete_messages(rights.can_delete_messages)
            .can_manage_video_chats(rights.can_manage_video_chats)
            .can_restrict_members(rights.can_restrict_members)
            .can_promote_members(rights.can_promote_members)
            .can_change_info(rights.can_change_info)
            .can_invite_users(rights.can_invite_users)
            .can_pin_messages(rights.can_pin_messages)
            .can_manage_topics(rights.can_manage_topics)
            .await?;
        Ok(())
    }

    async fn set_chat_photo(&self, chat_id: i64, photo: FileSource) -> Result<(), BotError> {
        let photo = photo.into_input_file()?;
        self.pace().await;
        self.bot.set_chat_photo(ChatId(chat_id), photo).await?;
        Ok(())
    }

    async fn delete_chat_photo(&self, chat_id: i64) -> Result<(), BotError> {
        self.pace().await;
        self.bot.delete_chat_photo(ChatId(chat_id)).await?;
        Ok(())
    }

    async fn set_chat_title(&self, chat_id: i64, title: &str) -> Result<(), BotError> {
        let len = title.trim().chars().count();
        if len == 0 || len > MAX_CHAT_TITLE_CHARS {
            return Err(BotError::Validation(format!(
                "chat title must be 1-{MAX_CHAT_TITLE_CHARS} characters"
            )));
        }
        self.pace().await;
        self.bot.set_chat_title(ChatId(chat_id), title).await?;
        Ok(())
    }

    async fn set_chat_description(
        &self,
        chat_id: i64,
        description: Option<&str>,
    ) -> Result<(), BotError> {
        if description.is_some_and(|d| d.chars().count() > MAX_CHAT_DESCRIPTION_CHARS) {
            return Err(BotError::Validation(format!(
                "chat description is longer than {MAX_CHAT_DESCRIPTION_CHARS} characters"
            )));
        }
        self.pace().await;
        let mut req = self.bot.set_chat_description(ChatId(chat_id));
        if let Some(description) = description {
            req = req.description(description);
        }
        req.await?;
        Ok(())
    }

    async fn pin_chat_message(
        &self,
        chat_id: i64,
        message_id: i32,
        disable_notification: bool,
    ) -> Result<(), BotError> {
        self.pace().await;
        self.bot
            .pin_chat_message(ChatId(chat_id), MessageId(message_id))
            .disable_notification(disable_notification)
            .await?;
        Ok(())
    }

    async fn unpin_chat_message(
        &self,
        chat_id: i64,
        message_id: Option<i32>,
    ) -> Result<(), BotError> {
        self.pace().await;
        let mut req = self.bot.unpin_chat_message(ChatId(chat_id));
        if let Some(id) = message_id {
            req = req.message_id(MessageId(id));
        }
        req.await?;
        Ok(())
    }

    async fn unpin_all_chat_messages(&self, chat_id: i64) -> Result<(), BotError> {
        self.pace().await;
        self.bot.unpin_all_chat_messages(ChatId(chat_id)).await?;
        Ok(())
    }
}

#[async_trait]
impl UpdateSource for TeloxideApi {
    async fn get_updates(&self, offset: i32, timeout_secs: u32) -> Result<Vec<Update>, BotError> {
        let updates = self
            .bot
            .get_updates()
            .offset(offset)
            .timeout(timeout_secs)
            .await?;
        Ok(updates)
    }
}

/// Decorator that records an `OUTGOING` log row for every message it
/// produces.
pub struct LoggedApi {
    inner: Arc<dyn TelegramApi>,
    pool: Pool,
}

impl LoggedApi {
    pub fn new(inner: Arc<dyn TelegramApi>, pool: Pool) -> Self {
        Self { inner, pool }
    }

    async fn record(&self, sent: &SentMessage, kind: &str) {
        let chat = db::get_chat_by_telegram_id(&self.pool, sent.chat_id)
            .await
            .ok()
            .flatten()
            .map(|c| c.id);
        let extra = json!({ "telegram_chat_id": sent.chat_id, "message_id": sent.message_id });
        if let Err(err) =
            db::insert_log(&self.pool, LogLevel::Outgoing, kind, None, chat, None, Some(&extra))
                .await
        {
            warn!(?err, "failed to record outgoing message");
        }
    }
}

#[async_trait]
impl TelegramApi for LoggedApi {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        let sent = self.inner.send_message(chat_id, text, opts).await?;
        self.record(&sent, "message sent").await;
        Ok(sent)
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        opts: SendOptions,
    ) -> Result<(), BotError> {
        self.inner
            .edit_message_text(chat_id, message_id, text, opts)
            .await
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), BotError> {
        self.inner.delete_message(chat_id, message_id).await
    }

    async fn forward_message(
        &self,
        to_chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
    ) -> Result<SentMessage, BotError> {
        let sent = self
            .inner
            .forward_message(to_chat_id, from_chat_id, message_id)
            .await?;
        self.record(&sent, "message forwarded").await;
        Ok(sent)
    }

    async fn send_chat_action(&self, chat_id: i64, action: ChatAction) -> Result<(), BotError> {
        self.inner.send_chat_action(chat_id, action).await
    }

    async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), BotError> {
        self.inner
            .answer_callback_query(callback_id, text, show_alert)
            .await
    }

    async fn copy_message(
        &self,
        to_chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
        caption: Option<&str>,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        let sent = self
            .inner
            .copy_message(to_chat_id, from_chat_id, message_id, caption, opts)
            .await?;
        self.record(&sent, "message copied").await;
        Ok(sent)
    }

    async fn send_media(
        &self,
        chat_id: i64,
        kind: MediaType,
        file: FileSource,
        caption: Option<&str>,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        let sent = self
            .inner
            .send_media(chat_id, kind, file, caption, opts)
            .await?;
        self.record(&sent, &format!("{} sent", kind.as_str())).await;
        Ok(sent)
    }

    async fn send_location(
        &self,
        chat_id: i64,
        latitude: f64,
        longitude: f64,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        let sent = self
            .inner
            .send_location(chat_id, latitude, longitude, opts)
            .await?;
        self.record(&sent, "location sent").await;
        Ok(sent)
    }

    async fn send_venue(
        &self,
        chat_id: i64,
        venue: &VenueInfo,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        let sent = self.inner.send_venue(chat_id, venue, opts).await?;
        self.record(&sent, "venue sent").await;
        Ok(sent)
    }

    async fn send_contact(
        &self,
        chat_id: i64,
        phone_number: &str,
        first_name: &str,
        last_name: Option<&str>,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        let sent = self
            .inner
            .send_contact(chat_id, phone_number, first_name, last_name, opts)
            .await?;
        self.record(&sent, "contact sent").await;
        Ok(sent)
    }

    async fn send_poll(
        &self,
        chat_id: i64,
        poll: &PollSpec,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        let sent = self.inner.send_poll(chat_id, poll, opts).await?;
        self.record(&sent, "poll sent").await;
        Ok(sent)
    }

    async fn send_dice(
        &self,
        chat_id: i64,
        emoji: DiceEmoji,
        opts: SendOptions,
    ) -> Result<SentMessage, BotError> {
        let sent = self.inner.send_dice(chat_id, emoji, opts).await?;
        self.record(&sent, "dice sent").await;
        Ok(sent)
    }

    async fn get_chat(&self, chat_id: i64) -> Result<Chat, BotError> {
        self.inner.get_chat(chat_id).await
    }

    async fn get_chat_member(&self, chat_id: i64, user_id: i64) -> Result<ChatMember, BotError> {
        self.inner.get_chat_member(chat_id, user_id).await
    }

    async fn get_chat_administrators(&self, chat_id: i64) -> Result<Vec<ChatMember>, BotError> {
        self.inner.get_chat_administrators(chat_id).await
    }

    async fn get_chat_member_count(&self, chat_id: i64) -> Result<u32, BotError> {
        self.inner.get_chat_member_count(chat_id).await
    }

    async fn get_user_profile_photos(
        &self,
        user_id: i64,
        offset: Option<u32>,
        limit: Option<u8>,
    ) -> Result<UserProfilePhotos, BotError> {
        self.inner
            .get_user_profile_photos(user_id, offset, limit)
            .await
    }

    async fn leave_chat(&self, chat_id: i64) -> Result<(), BotError> {
        self.inner.leave_chat(chat_id).await
    }

    async fn ban_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
        until: Option<DateTime<Utc>>,
        revoke_messages: bool,
    ) -> Result<(), BotError> {
        self.inner
            .ban_chat_member(chat_id, user_id, until, revoke_messages)
            .await
    }

    async fn unban_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
        only_if_banned: bool,
    ) -> Result<(), BotError> {
        self.inner
            .unban_chat_member(chat_id, user_id, only_if_banned)
            .await
    }

    async fn restrict_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
        permissions: ChatPermissions,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), BotError> {
        self.inner
            .restrict_chat_member(chat_id, user_id, permissions, until)
            .await
    }

    async fn promote_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
        rights: AdminRights,
    ) -> Result<(), BotError> {
        self.inner
            .promote_chat_member(chat_id, user_id, rights)
            .await
    }

    async fn set_chat_photo(&self, chat_id: i64, photo: FileSource) -> Result<(), BotError> {
        self.inner.set_chat_photo(chat_id, photo).await
    }

    async fn delete_chat_photo(&self, chat_id: i64) -> Result<(), BotError> {
        self.inner.delete_chat_photo(chat_id).await
    }

    async fn set_chat_title(&self, chat_id: i64, title: &str) -> Result<(), BotError> {
        self.inner.set_chat_title(chat_id, title).await
    }

    async fn set_chat_description(
        &self,
        chat_id: i64,
        description: Option<&str>,
    ) -> Result<(), BotError> {
        self.inner.set_chat_description(chat_id, description).await
    }

    async fn pin_chat_message(
        &self,
        chat_id: i64,
        message_id: i32,
        disable_notification: bool,
    ) -> Result<(), BotError> {
        self.inner
            .pin_chat_message(chat_id, message_id, disable_notification)
            .await
    }

    async fn unpin_chat_message(
        &self,
        chat_id: i64,
        message_id: Option<i32>,
    ) -> Result<(), BotError> {
        self.inner.unpin_chat_message(chat_id, message_id).await
    }

    async fn unpin_all_chat_messages(&self, chat_id: i64) -> Result<(), BotError> {
        self.inner.unpin_all_chat_messages(chat_id).await
    }
}

/// Sends and reports success; failures are logged, never returned.
pub async fn safe_send_message(
    api: &dyn TelegramApi,
    chat_id: i64,
    text: &str,
    opts: SendOptions,
) -> bool {
    match api.send_message(chat_id, text, opts).await {
        Ok(_) => true,
        Err(err) => {
            error!(chat_id, %err, "failed to send message");
            false
        }
    }
}

pub async fn safe_edit_message(
    api: &dyn TelegramApi,
    chat_id: i64,
    message_id: i32,
    text: &str,
    opts: SendOptions,
) -> bool {
    match api.edit_message_text(chat_id, message_id, text, opts).await {
        Ok(()) => true,
        Err(err) => {
            error!(chat_id, message_id, %err, "failed to edit message");
            false
        }
    }
}

/// Secret token for webhook delivery, derived from the bot token without
/// revealing it: hex SHA-256, which stays within the Bot API's
/// `A-Z a-z 0-9 _ -` alphabet.
pub fn webhook_secret(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"tg-botkit webhook:");
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// `bot.webhook_secret` when configured, otherwise [`webhook_secret`].
pub fn resolve_webhook_secret(config: &Config) -> String {
    match config.bot.webhook_secret.as_deref().map(str::trim) {
        Some(secret) if !secret.is_empty() => secret.to_string(),
        _ => webhook_secret(&config.bot.token),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WebhookStatus {
    pub url: String,
    pub has_custom_certificate: bool,
    pub pending_update_count: u64,
    pub last_error_message: Option<String>,
    pub max_connections: Option<u64>,
}

impl WebhookStatus {
    /// Reads a `WebhookInfo` in its Bot API JSON shape.
    pub fn from_json(raw: &Value) -> Self {
        Self {
            url: raw
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            has_custom_certificate: raw
                .get("has_custom_certificate")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            pending_update_count: raw
                .get("pending_update_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            last_error_message: raw
                .get("last_error_message")
                .and_then(Value::as_str)
                .map(str::to_string),
            max_connections: raw.get("max_connections").and_then(Value::as_u64),
        }
    }

    pub fn is_set(&self) -> bool {
        !self.url.is_empty()
    }
}

pub struct WebhookManager {
    bot: Bot,
    endpoint: Option<String>,
    secret: String,
}

impl WebhookManager {
    /// `endpoint` is the full public URL (base + path).
    pub fn new(bot: Bot, endpoint: Option<String>, secret: String) -> Self {
        Self {
            bot,
            endpoint,
            secret,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    #[instrument(skip_all)]
    pub async fn setup_webhook(&self) -> Result<(), BotError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| BotError::Webhook("webhook URL not configured".into()))?;
        let url = reqwest::Url::parse(endpoint)
            .map_err(|e| BotError::Webhook(format!("invalid webhook URL {endpoint}: {e}")))?;
        self.bot
            .set_webhook(url)
            .secret_token(self.secret.clone())
            .max_connections(WEBHOOK_MAX_CONNECTIONS)
            .await
            .map_err(|e| BotError::Webhook(e.to_string()))?;
        info!(%endpoint, "webhook set");
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn remove_webhook(&self) -> Result<(), BotError> {
        self.bot
            .delete_webhook()
            .await
            .map_err(|e| BotError::Webhook(e.to_string()))?;
        info!("webhook removed");
        Ok(())
    }

    pub async fn get_webhook_info(&self) -> Result<WebhookStatus, BotError> {
        let info = self
            .bot
            .get_webhook_info()
            .await
            .map_err(|e| BotError::Webhook(e.to_string()))?;
        let raw = serde_json::to_value(&info).unwrap_or(Value::Null);
        Ok(WebhookStatus::from_json(&raw))
    }
}

#[cfg(test)]
pub(crate) mod recording {
    //! A [`TelegramApi`] fake that records every call.
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Send { chat_id: i64, text: String, markup: Option<Value> },
        Edit { chat_id: i64, message_id: i32, text: String },
        Delete { chat_id: i64, message_id: i32 },
        Forward { to: i64, from: i64, message_id: i32 },
        Action { chat_id: i64 },
        Answer { id: String, text: Option<String> },
        Api { method: &'static str, chat_id: i64, args: Value },
    }

    #[derive(Default)]
    pub struct RecordingApi {
        pub calls: StdMutex<Vec<Call>>,
        pub fail_sends: bool,
    }

    impl RecordingApi {
        pub fn failing() -> Self {
            Self {
                fail_sends: true,
                ..Default::default()
            }
        }

        pub fn sent_texts(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| match c {
                    Call::Send { text, .. } => Some(text.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn methods(&self) -> Vec<&'static str> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| match c {
                    Call::Api { method, .. } => Some(*method),
                    _ => None,
                })
                .collect()
        }

        fn push(&self, method: &'static str, chat_id: i64, args: Value) -> SentMessage {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call::Api {
                method,
                chat_id,
                args,
            });
            SentMessage {
                chat_id,
                message_id: calls.len() as i32,
            }
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(raw: Value) -> T {
        serde_json::from_str(&raw.to_string()).unwrap()
    }

    fn member(user_id: i64, status: &str) -> ChatMember {
        let mut raw = json!({
            "user": { "id": user_id, "is_bot": false, "first_name": "Member" },
            "status": status
        });
        if status == "creator" {
            raw["is_anonymous"] = json!(false);
        }
        parse(raw)
    }

    #[async_trait]
    impl TelegramApi for RecordingApi {
        async fn send_message(
            &self,
            chat_id: i64,
            text: &str,
            opts: SendOptions,
        ) -> Result<SentMessage, BotError> {
            if self.fail_sends {
                return Err(BotError::ChatNotFound("chat not found".into()));
            }
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call::Send {
                chat_id,
                text: text.to_string(),
                markup: opts.reply_markup.map(|k| k.to_json()),
            });
            Ok(SentMessage {
                chat_id,
                message_id: calls.len() as i32,
            })
        }

        async fn edit_message_text(
            &self,
            chat_id: i64,
            message_id: i32,
            text: &str,
            _opts: SendOptions,
        ) -> Result<(), BotError> {
            if self.fail_sends {
                return Err(BotError::MessageNotFound("message to edit not found".into()));
            }
            self.calls.lock().unwrap().push(Call::Edit {
                chat_id,
                message_id,
                text: text.to_string(),
            });
            Ok(())
        }

        async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), BotError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Delete { chat_id, message_id });
            Ok(())
        }

        async fn forward_message(
            &self,
            to_chat_id: i64,
            from_chat_id: i64,
            message_id: i32,
        ) -> Result<SentMessage, BotError> {
            self.calls.lock().unwrap().push(Call::Forward {
                to: to_chat_id,
                from: from_chat_id,
                message_id,
            });
            Ok(SentMessage {
                chat_id: to_chat_id,
                message_id: message_id + 1000,
            })
        }

        async fn send_chat_action(&self, chat_id: i64, _action: ChatAction) -> Result<(), BotError> {
            self.calls.lock().unwrap().push(Call::Action { chat_id });
            Ok(())
        }

        async fn answer_callback_query(
            &self,
            callback_id: &str,
            text: Option<&str>,
            _show_alert: bool,
        ) -> Result<(), BotError> {
            self.calls.lock().unwrap().push(Call::Answer {
                id: callback_id.to_string(),
                text: text.map(str::to_string),
            });
            Ok(())
        }

        async fn copy_message(
            &self,
            to_chat_id: i64,
            from_chat_id: i64,
            message_id: i32,
            caption: Option<&str>,
            _opts: SendOptions,
        ) -> Result<SentMessage, BotError> {
            let args = json!({
                "from": from_chat_id,
                "message_id": message_id,
                "caption": caption
            });
            Ok(self.push("copyMessage", to_chat_id, args))
        }

        async fn send_media(
            &self,
            chat_id: i64,
            kind: MediaType,
            file: FileSource,
            caption: Option<&str>,
            _opts: SendOptions,
        ) -> Result<SentMessage, BotError> {
            if self.fail_sends {
                return Err(BotError::File("upload failed".into()));
            }
            let args = json!({
                "kind": kind.as_str(),
                "file": file.describe(),
                "caption": caption
            });
            Ok(self.push("sendMedia", chat_id, args))
        }

        async fn send_location(
            &self,
            chat_id: i64,
            latitude: f64,
            longitude: f64,
            _opts: SendOptions,
        ) -> Result<SentMessage, BotError> {
            let args = json!({ "latitude": latitude, "longitude": longitude });
            Ok(self.push("sendLocation", chat_id, args))
        }

        async fn send_venue(
            &self,
            chat_id: i64,
            venue: &VenueInfo,
            _opts: SendOptions,
        ) -> Result<SentMessage, BotError> {
            Ok(self.push("sendVenue", chat_id, json!(venue)))
        }

        async fn send_contact(
            &self,
            chat_id: i64,
            phone_number: &str,
            first_name: &str,
            last_name: Option<&str>,
            _opts: SendOptions,
        ) -> Result<SentMessage, BotError> {
            let args = json!({
                "phone": phone_number,
                "first_name": first_name,
                "last_name": last_name
            });
            Ok(self.push("sendContact", chat_id, args))
        }

        async fn send_poll(
            &self,
            chat_id: i64,
            poll: &PollSpec,
            _opts: SendOptions,
        ) -> Result<SentMessage, BotError> {
            poll.validate()?;
            Ok(self.push("sendPoll", chat_id, json!(poll)))
        }

        async fn send_dice(
            &self,
            chat_id: i64,
            emoji: DiceEmoji,
            _opts: SendOptions,
        ) -> Result<SentMessage, BotError> {
            Ok(self.push("sendDice", chat_id, json!(emoji)))
        }

        async fn get_chat(&self, chat_id: i64) -> Result<Chat, BotError> {
            self.push("getChat", chat_id, Value::Null);
            Ok(parse(json!({ "id": chat_id, "type": "group", "title": "Recorded" })))
        }

        async fn get_chat_member(
            &self,
            chat_id: i64,
            user_id: i64,
        ) -> Result<ChatMember, BotError> {
            self.push("getChatMember", chat_id, json!({ "user_id": user_id }));
            Ok(member(user_id, "member"))
        }

        async fn get_chat_administrators(
            &self,
            chat_id: i64,
        ) -> Result<Vec<ChatMember>, BotError> {
            self.push("getChatAdministrators", chat_id, Value::Null);
            Ok(vec![member(1, "creator")])
        }

        async fn get_chat_member_count(&self, chat_id: i64) -> Result<u32, BotError> {
            self.push("getChatMemberCount", chat_id, Value::Null);
            Ok(3)
        }

        async fn get_user_profile_photos(
            &self,
            user_id: i64,
            offset: Option<u32>,
            limit: Option<u8>,
        ) -> Result<UserProfilePhotos, BotError> {
            let args = json!({ "offset": offset, "limit": limit });
            self.push("getUserProfilePhotos", user_id, args);
            Ok(parse(json!({ "total_count": 0, "photos": [] })))
        }

        async fn leave_chat(&self, chat_id: i64) -> Result<(), BotError> {
            self.push("leaveChat", chat_id, Value::Null);
            Ok(())
        }

        async fn ban_chat_member(
            &self,
            chat_id: i64,
            user_id: i64,
            until: Option<DateTime<Utc>>,
            revoke_messages: bool,
        ) -> Result<(), BotError> {
            let args = json!({
                "user_id": user_id,
                "until": until.map(|t| t.timestamp()),
                "revoke_messages": revoke_messages
            });
            self.push("banChatMember", chat_id, args);
            Ok(())
        }

        async fn unban_chat_member(
            &self,
            chat_id: i64,
            user_id: i64,
            only_if_banned: bool,
        ) -> Result<(), BotError> {
            let args = json!({ "user_id": user_id, "only_if_banned": only_if_banned });
            self.push("unbanChatMember", chat_id, args);
            Ok(())
        }

        async fn restrict_chat_member(
            &self,
            chat_id: i64,
            user_id: i64,
            permissions: ChatPermissions,
            until: Option<DateTime<Utc>>,
        ) -> Result<(), BotError> {
            let args = json!({
                "user_id": user_id,
                "permissions": permissions,
                "until": until.map(|t| t.timestamp())
            });
            self.push("restrictChatMember", chat_id, args);
            Ok(())
        }

        async fn promote_chat_member(
            &self,
            chat_id: i64,
            user_id: i64,
            rights: AdminRights,
        ) -> Result<(), BotError> {
            let args = json!({ "user_id": user_id, "rights": rights });
            self.push("promoteChatMember", chat_id, args);
            Ok(())
        }

        async fn set_chat_photo(&self, chat_id: i64, photo: FileSource) -> Result<(), BotError> {
            self.push("setChatPhoto", chat_id, json!(photo.describe()));
            Ok(())
        }

        async fn delete_chat_photo(&self, chat_id: i64) -> Result<(), BotError> {
            self.push("deleteChatPhoto", chat_id, Value::Null);
            Ok(())
        }

        async fn set_chat_title(&self, chat_id: i64, title: &str) -> Result<(), BotError> {
            self.push("setChatTitle", chat_id, json!(title));
            Ok(())
        }

        async fn set_chat_description(
            &self,
            chat_id: i64,
            description: Option<&str>,
        ) -> Result<(), BotError> {
            self.push("setChatDescription", chat_id, json!(description));
            Ok(())
        }

        async fn pin_chat_message(
            &self,
            chat_id: i64,
            message_id: i32,
            disable_notification: bool,
        ) -> Result<(), BotError> {
            let args = json!({ "message_id": message_id, "silent": disable_notification });
            self.push("pinChatMessage", chat_id, args);
            Ok(())
        }

        async fn unpin_chat_message(
            &self,
            chat_id: i64,
            message_id: Option<i32>,
        ) -> Result<(), BotError> {
            self.push("unpinChatMessage", chat_id, json!(message_id));
            Ok(())
        }

        async fn unpin_all_chat_messages(&self, chat_id: i64) -> Result<(), BotError> {
            self.push("unpinAllChatMessages", chat_id, Value::Null);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::recording::{Call, RecordingApi};
    use super::*;
    use crate::keyboard::KeyboardBuilder;
    use crate::model::ChatMemberInfo;

    #[test]
    fn secret_does_not_leak_the_token() {
        let token = "123456:AAE-abc_DEF";
        let secret = webhook_secret(token);
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!secret.contains("123456"));
        assert!(!secret.contains("AAE-abc_DEF"));
        assert_eq!(secret, webhook_secret(token));
        assert_ne!(secret, webhook_secret("123456:other"));
    }

    #[test]
    fn configured_secret_wins() {
        let mut cfg: Config = serde_yaml::from_str(crate::config::example()).unwrap();
        assert_eq!(resolve_webhook_secret(&cfg), webhook_secret(&cfg.bot.token));
        cfg.bot.webhook_secret = Some("  ".into());
        assert_eq!(resolve_webhook_secret(&cfg), webhook_secret(&cfg.bot.token));
        cfg.bot.webhook_secret = Some("my-secret_1".into());
        assert_eq!(resolve_webhook_secret(&cfg), "my-secret_1");
    }

    #[test]
    fn webhook_status_from_bot_api_json() {
        let status = WebhookStatus::from_json(&json!({
            "url": "https://bot.example.com/webhook",
            "has_custom_certificate": false,
            "pending_update_count": 3,
            "last_error_message": "Connection refused",
            "max_connections": 40
        }));
        assert!(status.is_set());
        assert_eq!(status.pending_update_count, 3);
        assert_eq!(status.max_connections, Some(40));
        assert_eq!(status.last_error_message.as_deref(), Some("Connection refused"));
        assert!(!WebhookStatus::from_json(&json!({ "url": "" })).is_set());
    }

    #[test]
    fn edits_accept_only_inline_keyboards() {
        let mut kb = KeyboardBuilder::new();
        kb.add_inline_button("Ok", Some("ok"), None)
            .add_reply_button("Menu", false, false);
        let inline = Keyboard::from(kb.build_inline().unwrap());
        assert!(inline_markup(&inline).is_ok());
        let reply = Keyboard::from(kb.build_reply(true, false).unwrap());
        assert!(matches!(inline_markup(&reply), Err(BotError::Validation(_))));
    }

    #[tokio::test]
    async fn safe_helpers_swallow_errors() {
        let ok = RecordingApi::default();
        assert!(safe_send_message(&ok, 1, "hi", SendOptions::default()).await);
        assert!(safe_edit_message(&ok, 1, 5, "edited", SendOptions::default()).await);
        assert_eq!(ok.sent_texts(), vec!["hi"]);
        assert!(ok.calls().contains(&Call::Edit {
            chat_id: 1,
            message_id: 5,
            text: "edited".into()
        }));

        let failing = RecordingApi::failing();
        assert!(!safe_send_message(&failing, 1, "hi", SendOptions::default()).await);
        assert!(!safe_edit_message(&failing, 1, 5, "x", SendOptions::default()).await);
    }

    #[tokio::test]
    async fn logged_api_records_outgoing_messages() {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let inner = Arc::new(RecordingApi::default());
        let api = LoggedApi::new(inner.clone(), pool.clone());

        api.send_message(-5, "hello", SendOptions::default()).await.unwrap();
        api.answer_callback_query("cb", None, false).await.unwrap();

        let logs = db::list_logs(&pool, Some(LogLevel::Outgoing), 10, 0).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].extra_data.as_ref().unwrap().0["telegram_chat_id"], -5);
        assert_eq!(inner.calls().len(), 2);
    }

    #[test]
    fn file_sources_are_told_apart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.jpg");
        std::fs::write(&path, b"jpeg").unwrap();

        assert!(matches!(
            FileSource::parse("https://example.com/cat.jpg"),
            FileSource::Url(_)
        ));
        assert_eq!(
            FileSource::parse(path.to_str().unwrap()),
            FileSource::Path(path.clone())
        );
        assert_eq!(
            FileSource::parse(" AgACAgIAAxk "),
            FileSource::Id("AgACAgIAAxk".into())
        );

        let missing = FileSource::Path(dir.path().join("missing.jpg"));
        assert!(matches!(missing.into_input_file(), Err(BotError::File(_))));
        assert!(matches!(
            FileSource::Id(" ".into()).into_input_file(),
            Err(BotError::File(_))
        ));
        let upload = FileSource::Memory {
            name: "notes.txt".into(),
            data: b"hi".to_vec(),
        };
        assert!(upload.into_input_file().is_ok());
    }

    #[test]
    fn polls_are_checked_before_sending() {
        assert!(PollSpec::new("Lunch?", ["Pizza", "Sushi"]).validate().is_ok());
        assert!(PollSpec::new("Lunch?", ["Pizza"]).validate().is_err());
        assert!(PollSpec::new(" ", ["a", "b"]).validate().is_err());
        assert!(PollSpec::new("Q", ["a", ""]).validate().is_err());
        assert!(PollSpec::new("Q", ["a", "b"]).quiz(2).validate().is_err());

        let mut quiz = PollSpec::new("Q", ["a", "b"]).quiz(1);
        assert!(quiz.validate().is_ok());
        quiz.allows_multiple_answers = true;
        assert!(quiz.validate().is_err());
    }

    #[tokio::test]
    async fn teloxide_client_rejects_bad_input_without_a_request() {
        let api = TeloxideApi::new("123456:TEST");
        let opts = SendOptions::default;

        let poll = api.send_poll(1, &PollSpec::new("Q", ["only"]), opts()).await;
        assert!(matches!(poll, Err(BotError::Validation(_))));
        let sticker = api
            .send_media(
                1,
                MediaType::Sticker,
                FileSource::Id("sticker-id".into()),
                Some("caption"),
                opts(),
            )
            .await;
        assert!(matches!(sticker, Err(BotError::Validation(_))));
        let photo = api
            .send_photo(1, FileSource::Path("/nonexistent/cat.png".into()), None, opts())
            .await;
        assert!(matches!(photo, Err(BotError::File(_))));
        let long_caption = "x".repeat(MAX_CAPTION_CHARS + 1);
        let doc = api
            .send_document(1, FileSource::Id("doc".into()), Some(&long_caption), opts())
            .await;
        assert!(matches!(doc, Err(BotError::Validation(_))));
        let location = api.send_location(1, 91.0, 0.0, opts()).await;
        assert!(matches!(location, Err(BotError::Validation(_))));
        let ban = api.ban_chat_member(1, -7, None, false).await;
        assert!(matches!(ban, Err(BotError::Validation(_))));
        assert!(matches!(
            api.set_chat_title(1, "  ").await,
            Err(BotError::Validation(_))
        ));
        assert!(matches!(
            api.get_user_profile_photos(5, None, Some(0)).await,
            Err(BotError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn logged_api_records_every_produced_message() {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let inner = Arc::new(RecordingApi::default());
        let api = LoggedApi::new(inner.clone(), pool.clone());
        let opts = SendOptions::default;

        api.send_photo(-5, FileSource::Id("photo-id".into()), Some("look"), opts())
            .await
            .unwrap();
        api.copy_message(-5, -6, 10, None, opts()).await.unwrap();
        api.send_poll(-5, &PollSpec::new("Lunch?", ["Pizza", "Sushi"]), opts())
            .await
            .unwrap();
        api.send_dice(-5, DiceEmoji::Darts, opts()).await.unwrap();
        api.pin_chat_message(-5, 1, true).await.unwrap();
        api.ban_chat_member(-5, 7, None, true).await.unwrap();

        let logs = db::list_logs(&pool, Some(LogLevel::Outgoing), 10, 0).await.unwrap();
        let mut kinds: Vec<_> = logs.iter().map(|l| l.message.as_str()).collect();
        kinds.sort_unstable();
        assert_eq!(kinds, ["dice sent", "message copied", "photo sent", "poll sent"]);
        assert_eq!(
            inner.methods(),
            [
                "sendMedia",
                "copyMessage",
                "sendPoll",
                "sendDice",
                "pinChatMessage",
                "banChatMember"
            ]
        );
        assert!(inner.calls().contains(&Call::Api {
            method: "sendMedia",
            chat_id: -5,
            args: json!({ "kind": "photo", "file": "photo-id", "caption": "look" }),
        }));
    }

    #[tokio::test]
    async fn chat_queries_expose_member_rights() {
        let api = RecordingApi::default();

        let chat = api.get_chat(-42).await.unwrap();
        assert_eq!(chat.id, ChatId(-42));
        let member = api.get_chat_member(-42, 7).await.unwrap();
        assert_eq!(member.user.id, UserId(7));
        assert!(!ChatMemberInfo::from_member(&member).is_admin());
        let admins = api.get_chat_administrators(-42).await.unwrap();
        assert!(ChatMemberInfo::from_member(&admins[0]).is_admin());
        assert_eq!(api.get_chat_member_count(-42).await.unwrap(), 3);
        let photos = api.get_user_profile_photos(7, None, Some(1)).await.unwrap();
        assert_eq!(photos.total_count, 0);

        let rights = AdminRights {
            can_pin_messages: true,
            ..Default::default()
        };
        api.promote_chat_member(-42, 7, rights).await.unwrap();
        api.restrict_chat_member(-42, 8, ChatPermissions::SEND_MESSAGES, None)
            .await
            .unwrap();
        api.set_chat_description(-42, None).await.unwrap();
        api.unpin_chat_message(-42, None).await.unwrap();

        let calls = api.calls();
        let Some(Call::Api { args, .. }) = calls
            .iter()
            .find(|c| matches!(c, Call::Api { method: "promoteChatMember", .. }))
        else {
            panic!("promotion not recorded");
        };
        assert_eq!(args["rights"]["can_pin_messages"], true);
        assert_eq!(args["rights"]["can_promote_members"], false);
        assert_eq!(
            calls.last(),
            Some(&Call::Api {
                method: "unpinChatMessage",
                chat_id: -42,
                args: Value::Null,
            })
        );
    }
}
