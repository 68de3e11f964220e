//! Conversation memory backed by the Mem0 REST API.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use teloxide::types::Message;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Memory as MemoryConfig;

const NO_CONTEXT: &str = "No previous context found.";
const CONTEXT_ERROR: &str = "Error retrieving context.";

/// One chat turn in the shape Mem0 ingests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl MemoryMessage {
    pub fn new(role: &str, content: &str, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: timestamp.map(|t| t.to_rfc3339()),
        }
    }

    /// `assistant` for messages sent by bots, `user` otherwise.
    pub fn from_message(msg: &Message) -> Self {
        let from_bot = msg.from().map_or(false, |u| u.is_bot);
        let role = if msg.from().is_some() && !from_bot {
            "user"
        } else {
            "assistant"
        };
        let content = msg.text().or_else(|| msg.caption()).unwrap_or_default();
        Self::new(role, content, Some(msg.date))
    }
}

/// A stored memory as returned by search and listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRecord {
    pub id: Option<String>,
    pub memory: String,
}

impl MemoryRecord {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self {
                id: None,
                memory: s.clone(),
            }),
            Value::Object(obj) => Some(Self {
                id: obj.get("id").and_then(Value::as_str).map(str::to_string),
                memory: obj.get("memory")?.as_str()?.to_string(),
            }),
            _ => None,
        }
    }
}

/// Accepts either a bare list or `{"results": [...]}`.
fn parse_records(body: &Value) -> Vec<MemoryRecord> {
    let list = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => obj
            .get("results")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };
    list.iter().filter_map(MemoryRecord::from_value).collect()
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn add(&self, messages: &[MemoryMessage], user_id: &str) -> Result<Value>;

    async fn search(&self, query: &str, user_id: Option<&str>, limit: usize)
        -> Result<Vec<MemoryRecord>>;

    async fn get_all(&self, user_id: &str, limit: usize) -> Result<Vec<MemoryRecord>>;

    async fn delete_all(&self, user_id: &str) -> Result<bool>;
}

#[derive(Clone)]
pub struct Mem0Client {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for Mem0Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mem0Client")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Mem0Client {
    pub fn new(api_key: String, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("tg-botkit/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    /// `None` when no API key is configured.
    pub fn from_config(cfg: &MemoryConfig) -> Result<Option<Self>> {
        if !cfg.enabled() {
            return Ok(None);
        }
        let base = Url::parse(&cfg.base_url).context("invalid memory base_url")?;
        Ok(Some(Self::new(cfg.api_key.clone(), base)?))
    }

    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(path)
            .context("invalid memory base URL")?;
        let mut req = self
            .http
            .request(method, endpoint)
            .header("Authorization", format!("Token {}", self.api_key));
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        req.build().context("failed to build memory request")
    }

    async fn execute(&self, request: reqwest::Request) -> Result<Value> {
        debug!(method = %request.method(), url = %request.url(), "memory request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach memory service")?;
        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(%body, "rate limited by memory service");
            return Err(anyhow!("received 429 from memory service: {}", body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("memory service error {}: {}", status, body));
        }
        let text = res.text().await.context("failed to read memory response")?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).context("invalid memory response JSON")
    }
}

#[async_trait]
impl MemoryStore for Mem0Client {
    async fn add(&self, messages: &[MemoryMessage], user_id: &str) -> Result<Value> {
        let body = json!({ "messages": messages, "user_id": user_id });
        let req = self.build_request(Method::POST, "v1/memories/", &[], Some(&body))?;
        let result = self.execute(req).await?;
        info!(user_id, count = messages.len(), "added conversation memory");
        Ok(result)
    }

    async fn search(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let filters = match user_id {
            Some(id) => json!({ "OR": [{ "user_id": id }] }),
            None => json!({}),
        };
        let body = json!({ "query": query, "filters": filters, "top_k": limit });
        let req = self.build_request(Method::POST, "v2/memories/search/", &[], Some(&body))?;
        let mut records = parse_records(&self.execute(req).await?);
        records.truncate(limit);
        info!(user_id, count = records.len(), "searched memories");
        Ok(records)
    }

    async fn get_all(&self, user_id: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        let req = self.build_request(Method::GET, "v1/memories/", &[("user_id", user_id)], None)?;
        let mut records = parse_records(&self.execute(req).await?);
        records.truncate(limit);
        Ok(records)
    }

    async fn delete_all(&self, user_id: &str) -> Result<bool> {
        let req =
            self.build_request(Method::DELETE, "v1/memories/", &[("user_id", user_id)], None)?;
        self.execute(req).await?;
        info!(user_id, "deleted user memories");
        Ok(true)
    }
}

/// Buffers each user's messages and writes them to the store in batches.
pub struct ConversationMemory {
    store: Arc<dyn MemoryStore>,
    buffer_size: usize,
    buffers: Mutex<HashMap<String, Vec<MemoryMessage>>>,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn MemoryStore>, buffer_size: usize) -> Self {
        Self {
            store,
            buffer_size: buffer_size.max(1),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// Appends to the user's buffer and flushes once it is full.
    pub async fn add_message(&self, user_id: &str, message: MemoryMessage) -> Result<()> {
        let full = {
            let mut buffers = self.buffers.lock().await;
            let buf = buffers.entry(user_id.to_string()).or_default();
            buf.push(message);
            buf.len() >= self.buffer_size
        };
        if full {
            self.flush(user_id).await?;
        }
        Ok(())
    }

    pub async fn buffered(&self, user_id: &str) -> usize {
        self.buffers.lock().await.get(user_id).map_or(0, Vec::len)
    }

    /// Users with unflushed messages.
    pub async fn buffered_users(&self) -> usize {
        self.buffers.lock().await.len()
    }

    /// Writes the user's buffered messages and forgets the buffer. On failure
    /// the messages are put back.
    pub async fn flush(&self, user_id: &str) -> Result<()> {
        let pending = {
            let mut buffers = self.buffers.lock().await;
            match buffers.remove(user_id) {
                Some(buf) if !buf.is_empty() => buf,
                _ => return Ok(()),
            }
        };
        if let Err(err) = self.store.add(&pending, user_id).await {
            let mut buffers = self.buffers.lock().await;
            let buf = buffers.entry(user_id.to_string()).or_default();
            let newer = std::mem::replace(buf, pending);
            buf.extend(newer);
            return Err(err.context(format!("failed to flush memory for user {user_id}")));
        }
        Ok(())
    }

    /// Flushes every user; failures are logged and do not stop the others.
    pub async fn flush_all(&self) {
        let users: Vec<String> = self.buffers.lock().await.keys().cloned().collect();
        for user in users {
            if let Err(err) = self.flush(&user).await {
                error!(?err, user_id = %user, "memory flush failed");
            }
        }
    }

    /// Joined memories for the user, searched by `query` when given.
    pub async fn get_context(&self, user_id: &str, query: Option<&str>) -> String {
        let result = match query.filter(|q| !q.trim().is_empty()) {
            Some(q) => self.store.search(q, Some(user_id), 3).await,
            None => self.store.get_all(user_id, 5).await,
        };
        match result {
            Ok(records) if records.is_empty() => NO_CONTEXT.to_string(),
            Ok(records) => records
                .into_iter()
                .map(|r| r.memory)
                .collect::<Vec<_>>()
                .join("\n\n"),
            Err(err) => {
                error!(?err, user_id, "failed to get context");
                CONTEXT_ERROR.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures;
    use std::sync::Mutex as StdMutex;
    use teloxide::types::UpdateKind;

    #[derive(Default)]
    struct RecordingStore {
        added: StdMutex<Vec<(String, Vec<MemoryMessage>)>>,
        searches: StdMutex<Vec<(String, usize)>>,
        memories: Vec<MemoryRecord>,
        fail: bool,
    }

    #[async_trait]
    impl MemoryStore for RecordingStore {
        async fn add(&self, messages: &[MemoryMessage], user_id: &str) -> Result<Value> {
            if self.fail {
                return Err(anyhow!("unavailable"));
            }
            self.added
                .lock()
                .unwrap()
                .push((user_id.to_string(), messages.to_vec()));
            Ok(json!({ "ok": true }))
        }

        async fn search(
            &self,
            query: &str,
            _user_id: Option<&str>,
            limit: usize,
        ) -> Result<Vec<MemoryRecord>> {
            if self.fail {
                return Err(anyhow!("unavailable"));
            }
            self.searches.lock().unwrap().push((query.to_string(), limit));
            Ok(self.memories.iter().take(limit).cloned().collect())
        }

        async fn get_all(&self, _user_id: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
            self.searches.lock().unwrap().push((String::new(), limit));
            Ok(self.memories.iter().take(limit).cloned().collect())
        }

        async fn delete_all(&self, _user_id: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn record(text: &str) -> MemoryRecord {
        MemoryRecord {
            id: None,
            memory: text.to_string(),
        }
    }

    #[tokio::test]
    async fn flushes_when_buffer_fills() {
        let store = Arc::new(RecordingStore::default());
        let memory = ConversationMemory::new(store.clone(), 3);
        for i in 0..4 {
            memory
                .add_message("7", MemoryMessage::new("user", &format!("m{i}"), None))
                .await
                .unwrap();
        }
        {
            let added = store.added.lock().unwrap();
            assert_eq!(added.len(), 1);
            assert_eq!(added[0].0, "7");
            assert_eq!(added[0].1.len(), 3);
        }
        assert_eq!(memory.buffered("7").await, 1);

        assert_eq!(memory.buffered_users().await, 1);

        memory.flush_all().await;
        assert_eq!(store.added.lock().unwrap().len(), 2);
        assert_eq!(memory.buffered("7").await, 0);
        assert_eq!(memory.buffered_users().await, 0);
    }

    #[tokio::test]
    async fn failed_flush_keeps_messages() {
        let store = Arc::new(RecordingStore {
            fail: true,
            ..Default::default()
        });
        let memory = ConversationMemory::new(store, 1);
        let err = memory
            .add_message("7", MemoryMessage::new("user", "hello", None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("user 7"));
        assert_eq!(memory.buffered("7").await, 1);
    }

    #[tokio::test]
    async fn context_uses_search_limits() {
        let store = Arc::new(RecordingStore {
            memories: vec![record("likes tea"), record("lives in Oslo"), record("a"), record("b"), record("c"), record("d")],
            ..Default::default()
        });
        let memory = ConversationMemory::new(store.clone(), 5);

        let ctx = memory.get_context("7", Some("drinks")).await;
        assert_eq!(ctx, "likes tea\n\nlives in Oslo\n\na");
        let all = memory.get_context("7", None).await;
        assert_eq!(all.split("\n\n").count(), 5);

        let searches = store.searches.lock().unwrap();
        assert_eq!(searches[0], ("drinks".to_string(), 3));
        assert_eq!(searches[1], (String::new(), 5));
    }

    #[tokio::test]
    async fn context_fallbacks() {
        let empty = ConversationMemory::new(Arc::new(RecordingStore::default()), 5);
        assert_eq!(empty.get_context("1", Some("x")).await, NO_CONTEXT);

        let broken = ConversationMemory::new(
            Arc::new(RecordingStore {
                fail: true,
                ..Default::default()
            }),
            5,
        );
        assert_eq!(broken.get_context("1", Some("x")).await, CONTEXT_ERROR);
    }

    #[test]
    fn message_roles_and_content() {
        let update = fixtures::text_update(1, 2, "remember this");
        let UpdateKind::Message(msg) = &update.kind else {
            panic!("expected message");
        };
        let mm = MemoryMessage::from_message(msg);
        assert_eq!(mm.role, "user");
        assert_eq!(mm.content, "remember this");
        assert!(mm.timestamp.is_some());
    }

    #[test]
    fn parses_both_response_shapes() {
        let bare = json!([{ "id": "m1", "memory": "likes tea" }, "plain"]);
        let wrapped = json!({ "results": [{ "memory": "lives in Oslo" }, { "score": 1 }] });
        assert_eq!(parse_records(&bare).len(), 2);
        assert_eq!(parse_records(&bare)[0].id.as_deref(), Some("m1"));
        assert_eq!(parse_records(&wrapped), vec![record("lives in Oslo")]);
        assert!(parse_records(&Value::Null).is_empty());
    }

    #[test]
    fn build_request_sets_token_header() {
        let client = Mem0Client::new(
            "secret".into(),
            Url::parse("https://api.mem0.ai/").unwrap(),
        )
        .unwrap();
        let req = client
            .build_request(Method::DELETE, "v1/memories/", &[("user_id", "42")], None)
            .unwrap();
        assert_eq!(req.url().as_str(), "https://api.mem0.ai/v1/memories/?user_id=42");
        assert_eq!(req.headers()["Authorization"], "Token secret");

        let body = json!({ "query": "q" });
        let req = client
            .build_request(Method::POST, "v2/memories/search/", &[], Some(&body))
            .unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.headers()["content-type"], "application/json");
    }
}
