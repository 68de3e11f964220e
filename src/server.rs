//! HTTP surface: health and status endpoints, a send endpoint and the webhook
//! receiver.
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use teloxide::types::Update;
use tracing::{error, warn};

use crate::bot::{BotStatus, TelegramBot};
use crate::db;
use crate::telegram::SendOptions;

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
pub struct AppState {
    pub bot: Arc<TelegramBot>,
    /// Expected webhook secret. `None` (polling mode) leaves the webhook
    /// route unmounted.
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub chat_id: i64,
    pub text: String,
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub database: bool,
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/message", post(send_message));
    if state.webhook_secret.is_some() {
        let webhook_path = state.bot.config().bot.webhook_path.clone();
        router = router.route(&webhook_path, post(webhook));
    }
    router.with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({ "status": "running", "version": env!("CARGO_PKG_VERSION") }))
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    let database = db::ping(state.bot.pool()).await;
    Json(HealthStatus {
        status: if database { "healthy" } else { "degraded" },
        database,
    })
}

async fn status(State(state): State<AppState>) -> Json<BotStatus> {
    Json(state.bot.get_status())
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> (StatusCode, Json<Value>) {
    match state
        .bot
        .api()
        .send_message(req.chat_id, &req.text, SendOptions::default())
        .await
    {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "success": true, "message": "Message sent" })),
        ),
        Err(err) => {
            error!(chat_id = req.chat_id, %err, "send via http failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "success": false, "error": err.to_string() })),
            )
        }
    }
}

async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let given = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    if given.is_none() || given != state.webhook_secret.as_deref() {
        warn!("webhook call with bad secret token");
        return StatusCode::UNAUTHORIZED;
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(err) => {
            // Acknowledge anyway so Telegram stops redelivering it.
            warn!(%err, "unparseable webhook update");
            return StatusCode::OK;
        }
    };
    if let Err(err) = state.bot.handle_update(update).await {
        error!(?err, "failed to handle webhook update");
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, BotMode, Config};
    use crate::model::fixtures::message;
    use crate::telegram::recording::RecordingApi;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn app(api: Arc<RecordingApi>, secret: Option<&str>) -> Router {
        let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
        cfg.bot.mode = BotMode::Webhook;
        cfg.bot.webhook_path = "/webhook".into();
        cfg.bot.allowed_users.clear();
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let mut bot = TelegramBot::new(cfg, api, pool, None);
        bot.initialize().await.unwrap();
        router(AppState {
            bot: Arc::new(bot),
            webhook_secret: secret.map(str::to_string),
        })
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_database() {
        let app = app(Arc::new(RecordingApi::default()), None).await;
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, json!({ "status": "healthy", "database": true }));
    }

    #[tokio::test]
    async fn send_failure_is_bad_gateway() {
        let app = app(Arc::new(RecordingApi::failing()), None).await;
        let req = Request::post("/message")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"chat_id": 1, "text": "hi"}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(json_body(resp).await["success"], false);
    }

    fn webhook_call(secret: Option<&str>, body: String) -> Request<Body> {
        let mut req = Request::post("/webhook");
        if let Some(secret) = secret {
            req = req.header(SECRET_HEADER, secret);
        }
        req.body(Body::from(body)).unwrap()
    }

    fn admin_stats_update() -> String {
        json!({
            "update_id": 3,
            "message": message(8, 123456789, json!({ "text": "/stats" }))
        })
        .to_string()
    }

    #[tokio::test]
    async fn webhook_rejects_missing_or_wrong_secret() {
        let api = Arc::new(RecordingApi::default());
        let app = app(api.clone(), Some("s3cret")).await;

        let missing = app
            .clone()
            .oneshot(webhook_call(None, admin_stats_update()))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .clone()
            .oneshot(webhook_call(Some("guess"), admin_stats_update()))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let empty = app
            .oneshot(webhook_call(Some(""), admin_stats_update()))
            .await
            .unwrap();
        assert_eq!(empty.status(), StatusCode::UNAUTHORIZED);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn polling_mode_has_no_webhook_route() {
        let api = Arc::new(RecordingApi::default());
        let app = app(api.clone(), None).await;
        let resp = app
            .oneshot(webhook_call(None, admin_stats_update()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn webhook_accepts_secret_and_tolerates_garbage() {
        let api = Arc::new(RecordingApi::default());
        let app = app(api.clone(), Some("s3cret")).await;

        let garbage = app
            .clone()
            .oneshot(webhook_call(Some("s3cret"), "not json".into()))
            .await
            .unwrap();
        assert_eq!(garbage.status(), StatusCode::OK);

        let body = json!({
            "update_id": 3,
            "message": message(8, 5, json!({ "text": "via webhook" }))
        });
        let ok = app
            .oneshot(webhook_call(Some("s3cret"), body.to_string()))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(api.sent_texts(), vec!["You said: via webhook"]);
    }
}
