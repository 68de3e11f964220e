use super::model::{
    BotCommandRecord, ChatMemberRecord, ChatRecord, LogLevel, LogRecord, MessageRecord, NewChat,
    NewMessage, NewUser, SessionRecord, StatsRecord, UserRecord,
};
use crate::model::ChatMemberInfo;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::types::Json;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url)?;
    if normalized.starts_with("sqlite::memory") {
        // Every connection to an in-memory URL is a separate database.
        return SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(&normalized)
            .await
            .context("failed to open in-memory database");
    }
    let pool = SqlitePool::connect(&format!("{normalized}{}", create_flag(&normalized)))
        .await
        .with_context(|| format!("failed to open database {normalized}"))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

fn create_flag(url: &str) -> &'static str {
    if url.contains("mode=") {
        ""
    } else if url.contains('?') {
        "&mode=rwc"
    } else {
        "?mode=rwc"
    }
}

/// Expands a leading `~/` in file-backed SQLite URLs and creates the parent
/// directory. In-memory and non-sqlite URLs pass through unchanged.
fn prepare_sqlite_url(url: &str) -> Result<String> {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return Ok(url.to_string());
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return Ok(url.to_string());
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
    }

    let mut rebuilt = format!("sqlite://{expanded}");
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    Ok(rebuilt)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to run migrations")?;
    Ok(())
}

/// Liveness check used by the health endpoint.
pub async fn ping(pool: &Pool) -> bool {
    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
        .is_ok()
}

// ---- users ----

#[instrument(skip_all, fields(telegram_id = user.telegram_id))]
pub async fn upsert_user(pool: &Pool, user: &NewUser) -> Result<UserRecord> {
    let now = Utc::now();
    let rec = sqlx::query_as::<_, UserRecord>(
        "INSERT INTO users (telegram_id, username, first_name, last_name, language_code, is_bot, is_premium, created_at, updated_at, last_seen) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(telegram_id) DO UPDATE SET \
            username = excluded.username, \
            first_name = excluded.first_name, \
            last_name = excluded.last_name, \
            language_code = excluded.language_code, \
            is_premium = excluded.is_premium, \
            updated_at = excluded.updated_at, \
            last_seen = excluded.last_seen \
         RETURNING *",
    )
    .bind(user.telegram_id)
    .bind(&user.username)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.language_code)
    .bind(user.is_bot)
    .bind(user.is_premium)
    .bind(now)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .context("failed to upsert user")?;
    Ok(rec)
}

#[instrument(skip_all)]
pub async fn get_user_by_telegram_id(pool: &Pool, telegram_id: i64) -> Result<Option<UserRecord>> {
    let rec = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE telegram_id = ?")
        .bind(telegram_id)
        .fetch_optional(pool)
        .await?;
    Ok(rec)
}

#[instrument(skip_all)]
pub async fn get_user_by_id(pool: &Pool, id: i64) -> Result<Option<UserRecord>> {
    let rec = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(rec)
}

#[instrument(skip_all)]
pub async fn touch_user_last_seen(pool: &Pool, telegram_id: i64) -> Result<bool> {
    let res = sqlx::query("UPDATE users SET last_seen = ? WHERE telegram_id = ?")
        .bind(Utc::now())
        .bind(telegram_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Active users seen within the last `days` days.
#[instrument(skip_all)]
pub async fn count_active_users(pool: &Pool, days: i64) -> Result<i64> {
    let since = Utc::now() - Duration::days(days);
    count_users_seen_since(pool, since).await
}

async fn count_users_seen_since(pool: &Pool, since: DateTime<Utc>) -> Result<i64> {
    let n = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE is_active = 1 AND datetime(last_seen) >= datetime(?)",
    )
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

// ---- chats ----

#[instrument(skip_all, fields(telegram_id = chat.telegram_id))]
pub async fn upsert_chat(pool: &Pool, chat: &NewChat) -> Result<ChatRecord> {
    let now = Utc::now();
    let rec = sqlx::query_as::<_, ChatRecord>(
        "INSERT INTO chats (telegram_id, type, title, username, first_name, last_name, description, invite_link, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(telegram_id) DO UPDATE SET \
            type = excluded.type, \
            title = excluded.title, \
            username = excluded.username, \
            first_name = excluded.first_name, \
            last_name = excluded.last_name, \
            description = COALESCE(excluded.description, chats.description), \
            invite_link = COALESCE(excluded.invite_link, chats.invite_link), \
            updated_at = excluded.updated_at \
         RETURNING *",
    )
    .bind(chat.telegram_id)
    .bind(chat.chat_type.as_str())
    .bind(&chat.title)
    .bind(&chat.username)
    .bind(&chat.first_name)
    .bind(&chat.last_name)
    .bind(&chat.description)
    .bind(&chat.invite_link)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .context("failed to upsert chat")?;
    Ok(rec)
}

#[instrument(skip_all)]
pub async fn get_chat_by_telegram_id(pool: &Pool, telegram_id: i64) -> Result<Option<ChatRecord>> {
    let rec = sqlx::query_as::<_, ChatRecord>("SELECT * FROM chats WHERE telegram_id = ?")
        .bind(telegram_id)
        .fetch_optional(pool)
        .await?;
    Ok(rec)
}

/// Distinct chats with at least one message in the last `days` days.
#[instrument(skip_all)]
pub async fn count_active_chats(pool: &Pool, days: i64) -> Result<i64> {
    let since = Utc::now() - Duration::days(days);
    let n = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(DISTINCT chat_id) FROM messages WHERE datetime(created_at) >= datetime(?)",
    )
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

// ---- messages ----

#[instrument(skip_all, fields(telegram_id = msg.telegram_id, chat_id = chat_id))]
pub async fn save_message(
    pool: &Pool,
    msg: &NewMessage,
    chat_id: i64,
    user_id: Option<i64>,
) -> Result<MessageRecord> {
    let now = Utc::now();
    let rec = sqlx::query_as::<_, MessageRecord>(
        "INSERT INTO messages (telegram_id, chat_id, user_id, text, caption, message_type, media_type, file_id, reply_to_message_id, forward_from, entities, metadata, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(msg.telegram_id)
    .bind(chat_id)
    .bind(user_id)
    .bind(&msg.text)
    .bind(&msg.caption)
    .bind(msg.message_type.as_str())
    .bind(msg.media_type.map(|m| m.as_str()))
    .bind(&msg.file_id)
    .bind(msg.reply_to_message_id)
    .bind(msg.forward_from.clone().map(Json))
    .bind(msg.entities.clone().map(Json))
    .bind(Json(msg.metadata.clone()))
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .context("failed to save message")?;
    Ok(rec)
}

#[instrument(skip_all)]
pub async fn get_message_by_telegram_id(
    pool: &Pool,
    telegram_id: i64,
    chat_id: i64,
) -> Result<Option<MessageRecord>> {
    let rec = sqlx::query_as::<_, MessageRecord>(
        "SELECT * FROM messages WHERE telegram_id = ? AND chat_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(telegram_id)
    .bind(chat_id)
    .fetch_optional(pool)
    .await?;
    Ok(rec)
}

/// Newest first; deleted messages are skipped.
#[instrument(skip_all)]
pub async fn list_chat_messages(
    pool: &Pool,
    chat_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<MessageRecord>> {
    let rows = sqlx::query_as::<_, MessageRecord>(
        "SELECT * FROM messages WHERE chat_id = ? AND is_deleted = 0 \
         ORDER BY datetime(created_at) DESC, id DESC LIMIT ? OFFSET ?",
    )
    .bind(chat_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[instrument(skip_all)]
pub async fn count_chat_messages(pool: &Pool, chat_id: i64, days: i64) -> Result<i64> {
    let since = Utc::now() - Duration::days(days);
    let n = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM messages WHERE chat_id = ? AND datetime(created_at) >= datetime(?)",
    )
    .bind(chat_id)
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

#[instrument(skip_all)]
pub async fn mark_message_deleted(pool: &Pool, telegram_id: i64, chat_id: i64) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE messages SET is_deleted = 1, updated_at = ? WHERE telegram_id = ? AND chat_id = ?",
    )
    .bind(Utc::now())
    .bind(telegram_id)
    .bind(chat_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

// ---- chat members ----

/// Inserts or refreshes a membership, maintaining `joined_at`, `left_at` and
/// `promoted_at` from the status change.
#[instrument(skip_all, fields(chat_id = chat_id, user_id = user_id, status = %info.status))]
pub async fn upsert_chat_member(
    pool: &Pool,
    chat_id: i64,
    user_id: i64,
    info: &ChatMemberInfo,
) -> Result<ChatMemberRecord> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    let existing = sqlx::query_as::<_, ChatMemberRecord>(
        "SELECT * FROM chat_members WHERE chat_id = ? AND user_id = ?",
    )
    .bind(chat_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let gone = matches!(info.status.as_str(), "left" | "kicked");
    let (joined_at, left_at, promoted_at) = match &existing {
        Some(prev) => {
            let was_gone = matches!(prev.status.as_str(), "left" | "kicked");
            let left_at = if gone {
                if was_gone {
                    prev.left_at
                } else if prev.joined_at.is_some() {
                    Some(now)
                } else {
                    prev.left_at
                }
            } else {
                None
            };
            let joined_at = if !gone && was_gone {
                Some(now)
            } else {
                prev.joined_at
            };
            let promoted_at = if info.status == "administrator" && prev.status != "administrator" {
                Some(now)
            } else {
                prev.promoted_at
            };
            (joined_at, left_at, promoted_at)
        }
        None => {
            let joined_at = (!gone).then_some(now);
            let promoted_at = (info.status == "administrator").then_some(now);
            (joined_at, None, promoted_at)
        }
    };

    let rec = sqlx::query_as::<_, ChatMemberRecord>(
        "INSERT INTO chat_members (chat_id, user_id, status, custom_title, is_anonymous, can_be_edited, can_manage_chat, \
            can_post_messages, can_edit_messages, can_delete_messages, can_manage_video_chats, can_restrict_members, \
            can_promote_members, can_change_info, can_invite_users, can_pin_messages, can_manage_topics, \
            joined_at, promoted_at, left_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(chat_id, user_id) DO UPDATE SET \
            status = excluded.status, custom_title = excluded.custom_title, is_anonymous = excluded.is_anonymous, \
            can_be_edited = excluded.can_be_edited, can_manage_chat = excluded.can_manage_chat, \
            can_post_messages = excluded.can_post_messages, can_edit_messages = excluded.can_edit_messages, \
            can_delete_messages = excluded.can_delete_messages, can_manage_video_chats = excluded.can_manage_video_chats, \
            can_restrict_members = excluded.can_restrict_members, can_promote_members = excluded.can_promote_members, \
            can_change_info = excluded.can_change_info, can_invite_users = excluded.can_invite_users, \
            can_pin_messages = excluded.can_pin_messages, can_manage_topics = excluded.can_manage_topics, \
            joined_at = excluded.joined_at, promoted_at = excluded.promoted_at, left_at = excluded.left_at, \
            updated_at = excluded.updated_at \
         RETURNING *",
    )
    .bind(chat_id)
    .bind(user_id)
    .bind(&info.status)
    .bind(&info.custom_title)
    .bind(info.is_anonymous)
    .bind(info.can_be_edited)
    .bind(info.can_manage_chat)
    .bind(info.can_post_messages)
    .bind(info.can_edit_messages)
    .bind(info.can_delete_messages)
    .bind(info.can_manage_video_chats)
    .bind(info.can_restrict_members)
    .bind(info.can_promote_members)
    .bind(info.can_change_info)
    .bind(info.can_invite_users)
    .bind(info.can_pin_messages)
    .bind(info.can_manage_topics)
    .bind(joined_at)
    .bind(promoted_at)
    .bind(left_at)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .context("failed to upsert chat member")?;
    tx.commit().await?;
    Ok(rec)
}

#[instrument(skip_all)]
pub async fn list_chat_members(
    pool: &Pool,
    chat_id: i64,
    status: Option<&str>,
) -> Result<Vec<ChatMemberRecord>> {
    let rows = sqlx::query_as::<_, ChatMemberRecord>(
        "SELECT * FROM chat_members WHERE chat_id = ? AND (? IS NULL OR status = ?) ORDER BY id",
    )
    .bind(chat_id)
    .bind(status)
    .bind(status)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[instrument(skip_all)]
pub async fn list_chat_admins(pool: &Pool, chat_id: i64) -> Result<Vec<ChatMemberRecord>> {
    let rows = sqlx::query_as::<_, ChatMemberRecord>(
        "SELECT * FROM chat_members WHERE chat_id = ? AND status IN ('creator', 'administrator') ORDER BY id",
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---- bot commands ----

#[instrument(skip_all, fields(command = command))]
pub async fn upsert_bot_command(
    pool: &Pool,
    command: &str,
    description: &str,
    is_admin_only: bool,
) -> Result<BotCommandRecord> {
    let now = Utc::now();
    let rec = sqlx::query_as::<_, BotCommandRecord>(
        "INSERT INTO bot_commands (command, description, is_admin_only, created_at, updated_at) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(command) DO UPDATE SET description = excluded.description, \
            is_admin_only = excluded.is_admin_only, updated_at = excluded.updated_at \
         RETURNING *",
    )
    .bind(command)
    .bind(description)
    .bind(is_admin_only)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .context("failed to upsert bot command")?;
    Ok(rec)
}

#[instrument(skip_all)]
pub async fn list_bot_commands(pool: &Pool, include_disabled: bool) -> Result<Vec<BotCommandRecord>> {
    let rows = sqlx::query_as::<_, BotCommandRecord>(
        "SELECT * FROM bot_commands WHERE (? OR is_enabled = 1) ORDER BY command",
    )
    .bind(include_disabled)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[instrument(skip_all)]
pub async fn set_bot_command_enabled(pool: &Pool, command: &str, enabled: bool) -> Result<bool> {
    let res = sqlx::query("UPDATE bot_commands SET is_enabled = ?, updated_at = ? WHERE command = ?")
        .bind(enabled)
        .bind(Utc::now())
        .bind(command)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn increment_command_usage(pool: &Pool, command: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE bot_commands SET usage_count = usage_count + 1, updated_at = ? WHERE command = ?",
    )
    .bind(Utc::now())
    .bind(command)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

// ---- sessions ----

#[instrument(skip_all, fields(user_id = user_id, chat_id = chat_id))]
pub async fn save_session(
    pool: &Pool,
    user_id: i64,
    chat_id: i64,
    data: &Value,
    state: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<SessionRecord> {
    let now = Utc::now();
    let rec = sqlx::query_as::<_, SessionRecord>(
        "INSERT INTO user_sessions (user_id, chat_id, session_data, current_state, expires_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(user_id, chat_id) DO UPDATE SET session_data = excluded.session_data, \
            current_state = excluded.current_state, expires_at = excluded.expires_at, updated_at = excluded.updated_at \
         RETURNING *",
    )
    .bind(user_id)
    .bind(chat_id)
    .bind(Json(data))
    .bind(state)
    .bind(expires_at)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .context("failed to save session")?;
    Ok(rec)
}

/// Returns the session unless it has expired.
#[instrument(skip_all)]
pub async fn get_session(pool: &Pool, user_id: i64, chat_id: i64) -> Result<Option<SessionRecord>> {
    let rec = sqlx::query_as::<_, SessionRecord>(
        "SELECT * FROM user_sessions WHERE user_id = ? AND chat_id = ? \
         AND (expires_at IS NULL OR datetime(expires_at) > datetime(?))",
    )
    .bind(user_id)
    .bind(chat_id)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?;
    Ok(rec)
}

#[instrument(skip_all)]
pub async fn clear_session(pool: &Pool, user_id: i64, chat_id: i64) -> Result<bool> {
    let res = sqlx::query("DELETE FROM user_sessions WHERE user_id = ? AND chat_id = ?")
        .bind(user_id)
        .bind(chat_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

// ---- logs ----

#[instrument(skip_all, fields(level = level.as_str()))]
pub async fn insert_log(
    pool: &Pool,
    level: LogLevel,
    message: &str,
    user_id: Option<i64>,
    chat_id: Option<i64>,
    update_type: Option<&str>,
    extra: Option<&Value>,
) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO bot_logs (level, message, user_id, chat_id, update_type, extra_data, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(level.as_str())
    .bind(message)
    .bind(user_id)
    .bind(chat_id)
    .bind(update_type)
    .bind(extra.map(Json))
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .context("failed to insert log")?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn list_logs(
    pool: &Pool,
    level: Option<LogLevel>,
    limit: i64,
    offset: i64,
) -> Result<Vec<LogRecord>> {
    let level = level.map(|l| l.as_str());
    let rows = sqlx::query_as::<_, LogRecord>(
        "SELECT * FROM bot_logs WHERE (? IS NULL OR level = ?) \
         ORDER BY datetime(created_at) DESC, id DESC LIMIT ? OFFSET ?",
    )
    .bind(level)
    .bind(level)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Deletes logs older than `days` days and returns how many were removed.
#[instrument(skip_all)]
pub async fn cleanup_old_logs(pool: &Pool, days: i64) -> Result<u64> {
    let cutoff = Utc::now() - Duration::days(days);
    let res = sqlx::query("DELETE FROM bot_logs WHERE datetime(created_at) < datetime(?)")
        .bind(cutoff)
        .execute(pool)
        .await?;
    debug!(removed = res.rows_affected(), "old logs cleaned up");
    Ok(res.rows_affected())
}

// ---- stats ----

/// Recomputes the aggregate row for `day` (UTC) and upserts it.
#[instrument(skip_all, fields(%day))]
pub async fn update_daily_stats(pool: &Pool, day: NaiveDate) -> Result<StatsRecord> {
    let start = day
        .and_hms_opt(0, 0, 0)
        .map(|d| Utc.from_utc_datetime(&d))
        .context("invalid day")?;
    let end = start + Duration::days(1);

    let total_users = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    let active_users = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE datetime(last_seen) >= datetime(?) AND datetime(last_seen) < datetime(?)",
    )
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await?;
    let total_chats = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chats")
        .fetch_one(pool)
        .await?;
    let (active_chats, messages_received, commands_used) = sqlx::query_as::<_, (i64, i64, i64)>(
        "SELECT COUNT(DISTINCT chat_id), COUNT(*), COALESCE(SUM(CASE WHEN text LIKE '/%' THEN 1 ELSE 0 END), 0) \
         FROM messages WHERE datetime(created_at) >= datetime(?) AND datetime(created_at) < datetime(?)",
    )
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await?;
    let (messages_sent, errors_count) = sqlx::query_as::<_, (i64, i64)>(
        "SELECT COALESCE(SUM(CASE WHEN level = 'OUTGOING' THEN 1 ELSE 0 END), 0), \
                COALESCE(SUM(CASE WHEN level = 'ERROR' THEN 1 ELSE 0 END), 0) \
         FROM bot_logs WHERE datetime(created_at) >= datetime(?) AND datetime(created_at) < datetime(?)",
    )
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await?;

    let now = Utc::now();
    let rec = sqlx::query_as::<_, StatsRecord>(
        "INSERT INTO bot_stats (date, total_users, active_users, total_chats, active_chats, messages_sent, \
            messages_received, commands_used, errors_count, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(date) DO UPDATE SET total_users = excluded.total_users, active_users = excluded.active_users, \
            total_chats = excluded.total_chats, active_chats = excluded.active_chats, \
            messages_sent = excluded.messages_sent, messages_received = excluded.messages_received, \
            commands_used = excluded.commands_used, errors_count = excluded.errors_count, \
            updated_at = excluded.updated_at \
         RETURNING *",
    )
    .bind(day)
    .bind(total_users)
    .bind(active_users)
    .bind(total_chats)
    .bind(active_chats)
    .bind(messages_sent)
    .bind(messages_received)
    .bind(commands_used)
    .bind(errors_count)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await
    .context("failed to update daily stats")?;
    Ok(rec)
}

/// Stats rows for the last `days` days, newest first.
#[instrument(skip_all)]
pub async fn list_stats(pool: &Pool, days: i64) -> Result<Vec<StatsRecord>> {
    let since = Utc::now().date_naive() - Duration::days(days);
    let rows = sqlx::query_as::<_, StatsRecord>(
        "SELECT * FROM bot_stats WHERE date >= ? ORDER BY date DESC",
    )
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
