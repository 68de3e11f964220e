//! Error taxonomy for Telegram operations.
use teloxide::{ApiError, RequestError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("{message}")]
    Api { message: String, code: Option<u16> },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimit { retry_after: Option<u64> },
    #[error("chat not found: {0}")]
    ChatNotFound(String),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("message not found: {0}")]
    MessageNotFound(String),
    #[error("file error: {0}")]
    File(String),
    #[error("webhook error: {0}")]
    Webhook(String),
    #[error("bot was blocked or kicked: {0}")]
    BotBlocked(String),
    #[error("chat admin rights required: {0}")]
    ChatAdminRequired(String),
    #[error("network error: {0}")]
    Network(String),
}

impl BotError {
    pub fn api(message: impl Into<String>, code: Option<u16>) -> Self {
        BotError::Api {
            message: message.into(),
            code,
        }
    }

    /// HTTP-style error code as reported by the Bot API, when known.
    pub fn code(&self) -> Option<u16> {
        match self {
            BotError::Api { code, .. } => *code,
            BotError::Validation(_) => Some(400),
            BotError::Authentication(_) => Some(401),
            BotError::BotBlocked(_) | BotError::PermissionDenied(_) => Some(403),
            BotError::ChatNotFound(_)
            | BotError::UserNotFound(_)
            | BotError::MessageNotFound(_)
            | BotError::ChatAdminRequired(_) => Some(400),
            BotError::RateLimit { .. } => Some(429),
            BotError::File(_) | BotError::Webhook(_) | BotError::Network(_) => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BotError::RateLimit { .. } | BotError::Network(_))
    }
}

impl From<RequestError> for BotError {
    fn from(err: RequestError) -> Self {
        let text = err.to_string();
        match err {
            RequestError::Api(api) => match api {
                ApiError::BotBlocked | ApiError::BotKicked => BotError::BotBlocked(text),
                ApiError::ChatNotFound => BotError::ChatNotFound(text),
                ApiError::UserNotFound => BotError::UserNotFound(text),
                ApiError::MessageToEditNotFound | ApiError::MessageToDeleteNotFound => {
                    BotError::MessageNotFound(text)
                }
                // teloxide reports a rejected token as `NotFound` ("Unauthorized").
                ApiError::NotFound => BotError::Authentication(text),
                ApiError::NotEnoughRightsToRestrict
                | ApiError::NotEnoughRightsToPinMessage
                | ApiError::NotEnoughRightsToManagePins
                | ApiError::NotEnoughRightsToChangeChatPermissions => {
                    BotError::ChatAdminRequired(text)
                }
                ApiError::MethodNotAvailableInPrivateChats | ApiError::CantRestrictSelf => {
                    BotError::PermissionDenied(text)
                }
                _ => BotError::api(text, Some(400)),
            },
            RequestError::RetryAfter(wait) => BotError::RateLimit {
                retry_after: Some(wait.as_secs()),
            },
            RequestError::Network(_) | RequestError::Io(_) => BotError::Network(text),
            _ => BotError::api(text, None),
        }
    }
}
