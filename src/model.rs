//! Classification of inbound updates and messages, and conversion of teloxide
//! types into persistence inputs.
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use teloxide::types::{Chat, ChatMember, Message, MessageKind, MediaKind, Update, UpdateKind, User};

use crate::db::model::{NewChat, NewMessage, NewUser};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    Message,
    /// Routing-only: a message whose text is a bot command.
    Command,
    EditedMessage,
    ChannelPost,
    EditedChannelPost,
    InlineQuery,
    ChosenInlineResult,
    CallbackQuery,
    ShippingQuery,
    PreCheckoutQuery,
    Poll,
    PollAnswer,
    MyChatMember,
    ChatMember,
    ChatJoinRequest,
    Unknown,
}

impl UpdateType {
    /// Every routable type, in registry order.
    pub const ROUTABLE: [UpdateType; 15] = [
        UpdateType::Message,
        UpdateType::Command,
        UpdateType::CallbackQuery,
        UpdateType::InlineQuery,
        UpdateType::EditedMessage,
        UpdateType::ChannelPost,
        UpdateType::EditedChannelPost,
        UpdateType::ChosenInlineResult,
        UpdateType::ShippingQuery,
        UpdateType::PreCheckoutQuery,
        UpdateType::Poll,
        UpdateType::PollAnswer,
        UpdateType::MyChatMember,
        UpdateType::ChatMember,
        UpdateType::ChatJoinRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Message => "message",
            UpdateType::Command => "command",
            UpdateType::EditedMessage => "edited_message",
            UpdateType::ChannelPost => "channel_post",
            UpdateType::EditedChannelPost => "edited_channel_post",
            UpdateType::InlineQuery => "inline_query",
            UpdateType::ChosenInlineResult => "chosen_inline_result",
            UpdateType::CallbackQuery => "callback_query",
            UpdateType::ShippingQuery => "shipping_query",
            UpdateType::PreCheckoutQuery => "pre_checkout_query",
            UpdateType::Poll => "poll",
            UpdateType::PollAnswer => "poll_answer",
            UpdateType::MyChatMember => "my_chat_member",
            UpdateType::ChatMember => "chat_member",
            UpdateType::ChatJoinRequest => "chat_join_request",
            UpdateType::Unknown => "unknown",
        }
    }

    pub fn parse_type(s: &str) -> Option<UpdateType> {
        UpdateType::ROUTABLE
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
    }

    /// The update type as delivered by Telegram.
    pub fn of(update: &Update) -> UpdateType {
        match &update.kind {
            UpdateKind::Message(_) => UpdateType::Message,
            UpdateKind::EditedMessage(_) => UpdateType::EditedMessage,
            UpdateKind::ChannelPost(_) => UpdateType::ChannelPost,
            UpdateKind::EditedChannelPost(_) => UpdateType::EditedChannelPost,
            UpdateKind::CallbackQuery(_) => UpdateType::CallbackQuery,
            UpdateKind::InlineQuery(_) => UpdateType::InlineQuery,
            UpdateKind::ChosenInlineResult(_) => UpdateType::ChosenInlineResult,
            UpdateKind::ShippingQuery(_) => UpdateType::ShippingQuery,
            UpdateKind::PreCheckoutQuery(_) => UpdateType::PreCheckoutQuery,
            UpdateKind::Poll(_) => UpdateType::Poll,
            UpdateKind::PollAnswer(_) => UpdateType::PollAnswer,
            UpdateKind::MyChatMember(_) => UpdateType::MyChatMember,
            UpdateKind::ChatMember(_) => UpdateType::ChatMember,
            UpdateKind::ChatJoinRequest(_) => UpdateType::ChatJoinRequest,
            _ => UpdateType::Unknown,
        }
    }

    /// The type used for dispatch: like [`UpdateType::of`], but slash-prefixed
    /// messages route as [`UpdateType::Command`].
    pub fn route(update: &Update) -> UpdateType {
        match &update.kind {
            UpdateKind::Message(msg) if is_command(msg) => UpdateType::Command,
            _ => UpdateType::of(update),
        }
    }
}

pub fn is_command(msg: &Message) -> bool {
    msg.text().map(|t| t.trim_start().starts_with('/')).unwrap_or(false)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Private => "private",
            ChatType::Group => "group",
            ChatType::Supergroup => "supergroup",
            ChatType::Channel => "channel",
        }
    }

    pub fn parse_type(s: &str) -> Option<ChatType> {
        match s {
            "private" => Some(ChatType::Private),
            "group" => Some(ChatType::Group),
            "supergroup" => Some(ChatType::Supergroup),
            "channel" => Some(ChatType::Channel),
            _ => None,
        }
    }

    pub fn of(chat: &Chat) -> ChatType {
        if chat.is_private() {
            ChatType::Private
        } else if chat.is_supergroup() {
            ChatType::Supergroup
        } else if chat.is_channel() {
            ChatType::Channel
        } else {
            ChatType::Group
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Animation,
    Audio,
    Contact,
    Dice,
    Document,
    Game,
    Location,
    Photo,
    Poll,
    Sticker,
    Venue,
    Video,
    Voice,
    VideoNote,
    NewChatMembers,
    LeftChatMember,
    NewChatTitle,
    NewChatPhoto,
    DeleteChatPhoto,
    GroupChatCreated,
    SupergroupChatCreated,
    ChannelChatCreated,
    MigrateToChatId,
    MigrateFromChatId,
    PinnedMessage,
    Invoice,
    SuccessfulPayment,
    ConnectedWebsite,
    PassportData,
    ProximityAlertTriggered,
    VideoChatScheduled,
    VideoChatStarted,
    VideoChatEnded,
    VideoChatParticipantsInvited,
    MessageAutoDeleteTimerChanged,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Animation => "animation",
            MessageType::Audio => "audio",
            MessageType::Contact => "contact",
            MessageType::Dice => "dice",
            MessageType::Document => "document",
            MessageType::Game => "game",
            MessageType::Location => "location",
            MessageType::Photo => "photo",
            MessageType::Poll => "poll",
            MessageType::Sticker => "sticker",
            MessageType::Venue => "venue",
            MessageType::Video => "video",
            MessageType::Voice => "voice",
            MessageType::VideoNote => "video_note",
            MessageType::NewChatMembers => "new_chat_members",
            MessageType::LeftChatMember => "left_chat_member",
            MessageType::NewChatTitle => "new_chat_title",
            MessageType::NewChatPhoto => "new_chat_photo",
            MessageType::DeleteChatPhoto => "delete_chat_photo",
            MessageType::GroupChatCreated => "group_chat_created",
            MessageType::SupergroupChatCreated => "supergroup_chat_created",
            MessageType::ChannelChatCreated => "channel_chat_created",
            MessageType::MigrateToChatId => "migrate_to_chat_id",
            MessageType::MigrateFromChatId => "migrate_from_chat_id",
            MessageType::PinnedMessage => "pinned_message",
            MessageType::Invoice => "invoice",
            MessageType::SuccessfulPayment => "successful_payment",
            MessageType::ConnectedWebsite => "connected_website",
            MessageType::PassportData => "passport_data",
            MessageType::ProximityAlertTriggered => "proximity_alert_triggered",
            MessageType::VideoChatScheduled => "video_chat_scheduled",
            MessageType::VideoChatStarted => "video_chat_started",
            MessageType::VideoChatEnded => "video_chat_ended",
            MessageType::VideoChatParticipantsInvited => "video_chat_participants_invited",
            MessageType::MessageAutoDeleteTimerChanged => "message_auto_delete_timer_changed",
        }
    }

    /// Text wins over everything else; unknown service messages fall back to text.
    pub fn of(msg: &Message) -> MessageType {
        if msg.text().is_some() {
            return MessageType::Text;
        }
        if msg.migrate_to_chat_id().is_some() {
            return MessageType::MigrateToChatId;
        }
        if msg.migrate_from_chat_id().is_some() {
            return MessageType::MigrateFromChatId;
        }
        match &msg.kind {
            MessageKind::Common(common) => match &common.media_kind {
                MediaKind::Animation(_) => MessageType::Animation,
                MediaKind::Audio(_) => MessageType::Audio,
                MediaKind::Contact(_) => MessageType::Contact,
                MediaKind::Document(_) => MessageType::Document,
                MediaKind::Game(_) => MessageType::Game,
                MediaKind::Location(_) => MessageType::Location,
                MediaKind::Photo(_) => MessageType::Photo,
                MediaKind::Poll(_) => MessageType::Poll,
                MediaKind::Sticker(_) => MessageType::Sticker,
                MediaKind::Venue(_) => MessageType::Venue,
                MediaKind::Video(_) => MessageType::Video,
                MediaKind::VideoNote(_) => MessageType::VideoNote,
                MediaKind::Voice(_) => MessageType::Voice,
                _ => MessageType::Text,
            },
            MessageKind::NewChatMembers(_) => MessageType::NewChatMembers,
            MessageKind::LeftChatMember(_) => MessageType::LeftChatMember,
            MessageKind::NewChatTitle(_) => MessageType::NewChatTitle,
            MessageKind::NewChatPhoto(_) => MessageType::NewChatPhoto,
            MessageKind::DeleteChatPhoto(_) => MessageType::DeleteChatPhoto,
            MessageKind::GroupChatCreated(_) => MessageType::GroupChatCreated,
            MessageKind::SupergroupChatCreated(_) => MessageType::SupergroupChatCreated,
            MessageKind::ChannelChatCreated(_) => MessageType::ChannelChatCreated,
            MessageKind::Pinned(_) => MessageType::PinnedMessage,
            MessageKind::Invoice(_) => MessageType::Invoice,
            MessageKind::SuccessfulPayment(_) => MessageType::SuccessfulPayment,
            MessageKind::ConnectedWebsite(_) => MessageType::ConnectedWebsite,
            MessageKind::PassportData(_) => MessageType::PassportData,
            MessageKind::Dice(_) => MessageType::Dice,
            MessageKind::ProximityAlertTriggered(_) => MessageType::ProximityAlertTriggered,
            MessageKind::VideoChatScheduled(_) => MessageType::VideoChatScheduled,
            MessageKind::VideoChatStarted(_) => MessageType::VideoChatStarted,
            MessageKind::VideoChatEnded(_) => MessageType::VideoChatEnded,
            MessageKind::VideoChatParticipantsInvited(_) => {
                MessageType::VideoChatParticipantsInvited
            }
            MessageKind::MessageAutoDeleteTimerChanged(_) => {
                MessageType::MessageAutoDeleteTimerChanged
            }
            _ => MessageType::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Photo,
    Audio,
    Video,
    Voice,
    Document,
    Sticker,
    Animation,
    VideoNote,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Photo => "photo",
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::Voice => "voice",
            MediaType::Document => "document",
            MediaType::Sticker => "sticker",
            MediaType::Animation => "animation",
            MediaType::VideoNote => "video_note",
        }
    }

    pub fn parse_type(s: &str) -> Option<MediaType> {
        match s {
            "photo" => Some(MediaType::Photo),
            "audio" => Some(MediaType::Audio),
            "video" => Some(MediaType::Video),
            "voice" => Some(MediaType::Voice),
            "document" => Some(MediaType::Document),
            "sticker" => Some(MediaType::Sticker),
            "animation" => Some(MediaType::Animation),
            "video_note" => Some(MediaType::VideoNote),
            _ => None,
        }
    }

    /// Human label used in acknowledgements, e.g. "Video note".
    pub fn title(&self) -> String {
        let s = self.as_str().replace('_', " ");
        let mut chars = s.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    pub fn of(msg: &Message) -> Option<MediaType> {
        if msg.photo().is_some() {
            Some(MediaType::Photo)
        } else if msg.audio().is_some() {
            Some(MediaType::Audio)
        } else if msg.video().is_some() {
            Some(MediaType::Video)
        } else if msg.voice().is_some() {
            Some(MediaType::Voice)
        } else if msg.animation().is_some() {
            Some(MediaType::Animation)
        } else if msg.document().is_some() {
            Some(MediaType::Document)
        } else if msg.sticker().is_some() {
            Some(MediaType::Sticker)
        } else if msg.video_note().is_some() {
            Some(MediaType::VideoNote)
        } else {
            None
        }
    }
}

/// File id of the attached media; photos use the largest size.
pub fn file_id(msg: &Message) -> Option<String> {
    let id = match MediaType::of(msg)? {
        MediaType::Photo => &msg.photo()?.last()?.file.id,
        MediaType::Audio => &msg.audio()?.file.id,
        MediaType::Video => &msg.video()?.file.id,
        MediaType::Voice => &msg.voice()?.file.id,
        MediaType::Document => &msg.document()?.file.id,
        MediaType::Sticker => &msg.sticker()?.file.id,
        MediaType::Animation => &msg.animation()?.file.id,
        MediaType::VideoNote => &msg.video_note()?.file.id,
    };
    Some(id.to_string())
}

// Fields below are read from the Bot API JSON shape so they stay independent
// of teloxide's internal layout.
fn as_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Message entities as `{type, offset, length, url, user}` objects.
pub fn extract_entities(msg: &Message) -> Vec<Value> {
    let raw = as_json(msg);
    let list = raw
        .get("entities")
        .or_else(|| raw.get("caption_entities"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    list.into_iter()
        .map(|e| {
            json!({
                "type": e.get("type").cloned().unwrap_or(Value::Null),
                "offset": e.get("offset").cloned().unwrap_or(Value::Null),
                "length": e.get("length").cloned().unwrap_or(Value::Null),
                "url": e.get("url").cloned().unwrap_or(Value::Null),
                "user": e.get("user").cloned().unwrap_or(Value::Null),
            })
        })
        .collect()
}

/// Forward origin, reply reference and location, when present.
pub fn extract_metadata(msg: &Message) -> Value {
    let raw = as_json(msg);
    let mut meta = Map::new();
    if let Some(from) = raw.get("forward_from") {
        meta.insert("forward_from".into(), from.clone());
    }
    if let Some(reply) = msg.reply_to_message() {
        meta.insert(
            "reply_to".into(),
            json!({
                "message_id": reply.id.0,
                "text": reply.text(),
            }),
        );
    }
    if let Some(loc) = raw.get("location") {
        meta.insert(
            "location".into(),
            json!({
                "latitude": loc.get("latitude").cloned().unwrap_or(Value::Null),
                "longitude": loc.get("longitude").cloned().unwrap_or(Value::Null),
            }),
        );
    }
    Value::Object(meta)
}

/// Status and permission flags of a chat member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatMemberInfo {
    pub status: String,
    pub custom_title: Option<String>,
    pub is_anonymous: bool,
    pub can_be_edited: bool,
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

impl ChatMemberInfo {
    pub fn with_status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            ..Default::default()
        }
    }

    pub fn from_member(member: &ChatMember) -> Self {
        Self::from_json(&as_json(member))
    }

    pub fn from_json(raw: &Value) -> Self {
        let flag = |key: &str| raw.get(key).and_then(Value::as_bool).unwrap_or(false);
        Self {
            status: raw
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("member")
                .to_string(),
            custom_title: raw
                .get("custom_title")
                .and_then(Value::as_str)
                .map(str::to_string),
            is_anonymous: flag("is_anonymous"),
            can_be_edited: flag("can_be_edited"),
            can_manage_chat: flag("can_manage_chat"),
            can_post_messages: flag("can_post_messages"),
            can_edit_messages: flag("can_edit_messages"),
            can_delete_messages: flag("can_delete_messages"),
            can_manage_video_chats: flag("can_manage_video_chats"),
            can_restrict_members: flag("can_restrict_members"),
            can_promote_members: flag("can_promote_members"),
            can_change_info: flag("can_change_info"),
            can_invite_users: flag("can_invite_users"),
            can_pin_messages: flag("can_pin_messages"),
            can_manage_topics: flag("can_manage_topics"),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.status.as_str(), "administrator" | "creator")
    }
}

impl From<&User> for NewUser {
    fn from(user: &User) -> Self {
        NewUser {
            telegram_id: user.id.0 as i64,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            language_code: user.language_code.clone(),
            is_bot: user.is_bot,
            is_premium: user.is_premium,
        }
    }
}

impl From<&Chat> for NewChat {
    fn from(chat: &Chat) -> Self {
        NewChat {
            telegram_id: chat.id.0,
            chat_type: ChatType::of(chat),
            title: chat.title().map(str::to_string),
            username: chat.username().map(str::to_string),
            first_name: chat.first_name().map(str::to_string),
            last_name: chat.last_name().map(str::to_string),
            description: chat.description().map(str::to_string),
            invite_link: chat.invite_link().map(str::to_string),
        }
    }
}

impl From<&Message> for NewMessage {
    fn from(msg: &Message) -> Self {
        let entities = extract_entities(msg);
        NewMessage {
            telegram_id: msg.id.0,
            text: msg.text().map(str::to_string),
            caption: msg.caption().map(str::to_string),
            message_type: MessageType::of(msg),
            media_type: MediaType::of(msg),
            file_id: file_id(msg),
            reply_to_message_id: msg.reply_to_message().map(|m| m.id.0),
            forward_from: as_json(msg).get("forward_from").cloned(),
            entities: (!entities.is_empty()).then(|| Value::Array(entities)),
            metadata: extract_metadata(msg),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Bot API JSON builders shared by unit tests.
    use serde_json::{json, Value};
    use teloxide::types::Update;

    pub fn user(id: i64) -> Value {
        json!({ "id": id, "is_bot": false, "first_name": "John", "last_name": "Doe", "username": "john_doe", "language_code": "en" })
    }

    pub fn private_chat(id: i64) -> Value {
        json!({ "id": id, "type": "private", "first_name": "John", "username": "john_doe" })
    }

    pub fn message(chat_id: i64, user_id: i64, extra: Value) -> Value {
        let mut msg = json!({
            "message_id": 10,
            "date": 1_700_000_000,
            "chat": private_chat(chat_id),
            "from": user(user_id),
        });
        if let (Some(obj), Some(extra)) = (msg.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        msg
    }

    pub fn update(body: Value) -> Update {
        let mut raw = json!({ "update_id": 1 });
        if let (Some(obj), Some(extra)) = (raw.as_object_mut(), body.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        // `UpdateKind` needs borrowed keys, which a `Value` cannot lend.
        serde_json::from_str(&raw.to_string()).unwrap()
    }

    pub fn text_update(chat_id: i64, user_id: i64, text: &str) -> Update {
        update(json!({ "message": message(chat_id, user_id, json!({ "text": text })) }))
    }
}
