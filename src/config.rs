//! Configuration loader and validator for the bot runtime.
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub bot: BotSettings,
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub memory: Memory,
    #[serde(default)]
    pub app: App,
}

/// How updates reach the bot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BotMode {
    #[default]
    Polling,
    Webhook,
}

impl BotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotMode::Polling => "polling",
            BotMode::Webhook => "webhook",
        }
    }

    pub fn parse_mode(s: &str) -> Option<BotMode> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" => Some(BotMode::Polling),
            "webhook" => Some(BotMode::Webhook),
            _ => None,
        }
    }
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BotSettings {
    pub token: String,
    #[serde(default)]
    pub mode: BotMode,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    /// Secret Telegram echoes in `X-Telegram-Bot-Api-Secret-Token`. When
    /// unset, one is derived from the token.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub admin_users: Vec<i64>,
    #[serde(default)]
    pub allowed_users: Vec<i64>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

/// HTTP listener for the webhook and the REST endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Database {
    #[serde(default = "default_database_url")]
    pub url: String,
}

/// Hosted conversation memory (Mem0). Disabled while `api_key` is empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Memory {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_memory_base_url")]
    pub base_url: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_webhook_path() -> String {
    "/webhook".into()
}

fn default_rate_limit() -> u32 {
    30
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".into()
}

fn default_database_url() -> String {
    "sqlite://./data/bot.db".into()
}

fn default_memory_base_url() -> String {
    "https://api.mem0.ai/".into()
}

fn default_buffer_size() -> usize {
    5
}

fn default_log_level() -> String {
    "info".into()
}

fn default_environment() -> String {
    "production".into()
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_memory_base_url(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            environment: default_environment(),
        }
    }
}

impl Memory {
    pub fn enabled(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl Config {
    /// Full webhook URL (base + path), if a base URL is configured.
    pub fn webhook_endpoint(&self) -> Option<String> {
        let base = self.bot.webhook_url.as_deref()?.trim_end_matches('/');
        if base.is_empty() {
            return None;
        }
        Some(format!("{}{}", base, self.bot.webhook_path))
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .listen_addr
            .parse()
            .map_err(|_| ConfigError::Invalid("server.listen_addr must be host:port"))
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.bot.admin_users.contains(&user_id)
    }

    /// An empty allow-list admits everybody.
    pub fn is_allowed(&self, user_id: i64) -> bool {
        self.bot.allowed_users.is_empty() || self.bot.allowed_users.contains(&user_id)
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    load_with_mode(path, None)
}

/// Like [`load`], with `mode` (e.g. from the command line) taking precedence
/// over the file and environment before validation.
pub fn load_with_mode(path: Option<&Path>, mode: Option<BotMode>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    apply_env(&mut cfg, |key| std::env::var(key).ok())?;
    if let Some(mode) = mode {
        cfg.bot.mode = mode;
    }
    validate(&cfg)?;
    Ok(cfg)
}

/// Override file values with environment variables.
pub fn apply_env<F>(cfg: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(token) = var("BOT_TOKEN") {
        cfg.bot.token = token;
    }
    if let Some(url) = var("WEBHOOK_URL") {
        cfg.bot.webhook_url = Some(url);
        cfg.bot.mode = BotMode::Webhook;
    }
    if let Some(secret) = var("WEBHOOK_SECRET") {
        cfg.bot.webhook_secret = Some(secret);
    }
    if let Some(admin) = var("ADMIN_USER_ID") {
        let id: i64 = admin
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid("ADMIN_USER_ID must be an integer"))?;
        if !cfg.bot.admin_users.contains(&id) {
            cfg.bot.admin_users.push(id);
        }
    }
    if let Some(url) = var("DATABASE_URL") {
        cfg.database.url = url;
    }
    if let Some(level) = var("LOG_LEVEL") {
        cfg.app.log_level = level.to_ascii_lowercase();
    }
    if let Some(env) = var("ENVIRONMENT") {
        cfg.app.environment = env;
    }
    if let Some(key) = var("MEM0_API_KEY") {
        cfg.memory.api_key = key;
    }
    if let Some(addr) = var("LISTEN_ADDR") {
        cfg.server.listen_addr = addr;
    }
    Ok(())
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.bot.token.trim().is_empty() {
        return Err(ConfigError::Invalid("bot.token must be non-empty"));
    }
    if !cfg.bot.webhook_path.starts_with('/') {
        return Err(ConfigError::Invalid("bot.webhook_path must start with '/'"));
    }
    if cfg.bot.mode == BotMode::Webhook && cfg.webhook_endpoint().is_none() {
        return Err(ConfigError::Invalid(
            "bot.webhook_url is required in webhook mode",
        ));
    }
    if let Some(secret) = cfg.bot.webhook_secret.as_deref() {
        let legal = secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if secret.is_empty() || secret.len() > 256 || !legal {
            return Err(ConfigError::Invalid(
                "bot.webhook_secret must be 1-256 characters of A-Z a-z 0-9 _ -",
            ));
        }
    }
    if cfg.bot.rate_limit_per_minute == 0 {
        return Err(ConfigError::Invalid("bot.rate_limit_per_minute must be > 0"));
    }
    cfg.listen_addr()?;

    if cfg.database.url.trim().is_empty() {
        return Err(ConfigError::Invalid("database.url must be non-empty"));
    }

    if cfg.memory.buffer_size == 0 {
        return Err(ConfigError::Invalid("memory.buffer_size must be > 0"));
    }
    if cfg.memory.enabled() && reqwest::Url::parse(&cfg.memory.base_url).is_err() {
        return Err(ConfigError::Invalid("memory.base_url must be a valid URL"));
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"bot:
  token: "123456789:YOUR_TELEGRAM_BOT_TOKEN"
  mode: polling
  webhook_url: null
  webhook_path: "/webhook"
  webhook_secret: null
  admin_users:
    - 123456789
  allowed_users: []
  rate_limit_per_minute: 30

server:
  listen_addr: "0.0.0.0:8000"

database:
  url: "sqlite://./data/bot.db"

memory:
  api_key: ""
  base_url: "https://api.mem0.ai/"
  buffer_size: 5

app:
  log_level: "info"
  environment: "production"
"#
}
