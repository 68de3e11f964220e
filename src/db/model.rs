//! Database entity models and repository inputs.
//!
//! Row structs map one table each; `New*` structs are the write side used by
//! the upsert functions in `repo`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;

use crate::model::{ChatType, MediaType, MessageType};

#[derive(Debug, Clone)]
pub struct NewUser {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
    pub is_bot: bool,
    pub is_premium: bool,
}

#[derive(Debug, Clone)]
pub struct NewChat {
    pub telegram_id: i64,
    pub chat_type: ChatType,
    pub title: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub description: Option<String>,
    pub invite_link: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub telegram_id: i32,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub message_type: MessageType,
    pub media_type: Option<MediaType>,
    pub file_id: Option<String>,
    pub reply_to_message_id: Option<i32>,
    pub forward_from: Option<Value>,
    pub entities: Option<Value>,
    pub metadata: Value,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
    pub is_bot: bool,
    pub is_premium: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl UserRecord {
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChatRecord {
    pub id: i64,
    pub telegram_id: i64,
    #[sqlx(rename = "type")]
    pub chat_type: String,
    pub title: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub description: Option<String>,
    pub invite_link: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatRecord {
    pub fn kind(&self) -> Option<ChatType> {
        ChatType::parse_type(&self.chat_type)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub telegram_id: i64,
    pub chat_id: i64,
    pub user_id: Option<i64>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub message_type: String,
    pub media_type: Option<String>,
    pub file_id: Option<String>,
    pub reply_to_message_id: Option<i64>,
    pub forward_from: Option<Json<Value>>,
    pub entities: Option<Json<Value>>,
    pub metadata: Option<Json<Value>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChatMemberRecord {
    pub id: i64,
    pub chat_id: i64,
    pub user_id: i64,
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
    pub joined_at: Option<DateTime<Utc>>,
    pub promoted_at: Option<DateTime<Utc>>,
    pub left_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BotCommandRecord {
    pub id: i64,
    pub command: String,
    pub description: String,
    pub is_enabled: bool,
    pub is_admin_only: bool,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SessionRecord {
    pub id: i64,
    pub user_id: i64,
    pub chat_id: i64,
    pub session_data: Json<Value>,
    pub current_state: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LogRecord {
    pub id: i64,
    pub level: String,
    pub message: String,
    pub user_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub update_type: Option<String>,
    pub extra_data: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
}

/// Daily aggregate row; `date` is the UTC day.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StatsRecord {
    pub id: i64,
    pub date: NaiveDate,
    pub total_users: i64,
    pub active_users: i64,
    pub total_chats: i64,
    pub active_chats: i64,
    pub messages_sent: i64,
    pub messages_received: i64,
    pub commands_used: i64,
    pub errors_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Log levels written by the pipeline. `Outgoing` marks messages the bot sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Outgoing,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Outgoing => "OUTGOING",
        }
    }
}
