//! Bot configuration
//!
//! Loaded from ~/.config/reeltalk/config.toml (or `--config`), then
//! overridden by the environment variables the bot has always used.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reeltalk_core::DispatcherConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub telegram: TelegramSection,
    pub openai: OpenAiSection,
    pub knowledge: KnowledgeSection,
    pub limits: LimitsSection,
    pub server: ServerSection,
    /// JSON-lines interaction log; interactions only go to tracing when unset.
    pub interaction_log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    pub token: Option<String>,
    /// Bot handle used to detect mentions in groups.
    pub bot_username: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSection {
    pub api_key: Option<String>,
    /// Base URL; `/chat/completions` is appended.
    pub endpoint: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeSection {
    pub enabled: bool,
    pub url: Option<String>,
    pub train_endpoint: Option<String>,
    pub api_key: Option<String>,
}

impl Default for KnowledgeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            train_endpoint: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub messages_per_window: usize,
    pub window_minutes: u64,
    pub conversation_ttl_minutes: u64,
    pub max_text_len: usize,
    /// Sender ids exempt from the limit and allowed to use /learn.
    pub no_limit_users: Vec<String>,
}

impl Default for LimitsSection {
    fn default() -> Self {
        let defaults = DispatcherConfig::default();
        Self {
            messages_per_window: defaults.limit,
            window_minutes: defaults.window.as_secs() / 60,
            conversation_ttl_minutes: defaults.conversation_ttl.as_secs() / 60,
            max_text_len: defaults.max_text_len,
            no_limit_users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl BotConfig {
    /// Load from `path`, or the default location when `None`. A missing
    /// default file yields the default config; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from_path(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("reeltalk").join("config.toml"))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(token) = get("TELEGRAM_TOKEN") {
            self.telegram.token = Some(token);
        }
        if let Some(username) = get("BOT_USERNAME") {
            self.telegram.bot_username = Some(username);
        }
        if let Some(key) = get("OPENAI_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(endpoint) = get("OPENAI_ENDPOINT") {
            self.openai.endpoint = Some(endpoint);
        }
        if let Some(raw) = get("NO_LIMIT_USERS") {
            self.limits.no_limit_users = parse_user_list(&raw);
        }
        if let Some(flag) = get("KNOWLEDGE_BASE") {
            self.knowledge.enabled = flag.trim().eq_ignore_ascii_case("on");
        }
        if let Some(url) = get("KNOWLEDGE_BASE_URL") {
            self.knowledge.url = Some(url);
        }
        if let Some(endpoint) = get("KNOWLEDGE_BASE_TRAIN_ENDPOINT") {
            self.knowledge.train_endpoint = Some(endpoint);
        }
        if let Some(key) = get("API_KEY") {
            self.knowledge.api_key = Some(key);
        }
        if let Some(path) = get("INTERACTION_LOG_PATH") {
            self.interaction_log_path = Some(PathBuf::from(path));
        }
        if let Some(port) = get("PORT") {
            match port.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid PORT"),
            }
        }
    }

    /// Check required settings. Missing credentials are fatal; an unusable
    /// knowledge-base setup is switched off with a warning.
    pub fn validate(&mut self) -> Result<()> {
        if is_blank(&self.telegram.token) {
            bail!("Telegram bot token is not configured (set TELEGRAM_TOKEN)");
        }
        if is_blank(&self.openai.api_key) {
            bail!("OpenAI API key is not configured (set OPENAI_KEY)");
        }
        if is_blank(&self.telegram.bot_username) {
            warn!("BOT_USERNAME is not set; group mentions will never match");
        }
        if self.knowledge.enabled && (is_blank(&self.knowledge.url) || is_blank(&self.knowledge.api_key)) {
            warn!("Knowledge base enabled without KNOWLEDGE_BASE_URL or API_KEY; disabling it");
            self.knowledge.enabled = false;
        }
        if self.limits.window_minutes == 0 || self.limits.messages_per_window == 0 {
            bail!("Rate limit window and message count must be positive");
        }
        Ok(())
    }

    /// Resolved settings for the dispatcher.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            limit: self.limits.messages_per_window,
            window: Duration::from_secs(self.limits.window_minutes * 60),
            conversation_ttl: Duration::from_secs(self.limits.conversation_ttl_minutes * 60),
            max_text_len: self.limits.max_text_len,
            unmetered: self.limits.no_limit_users.iter().cloned().collect::<HashSet<_>>(),
            knowledge_enabled: self.knowledge.enabled,
            bot_handle: self.telegram.bot_username.clone().unwrap_or_default(),
            ..DispatcherConfig::default()
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|value| value.trim().is_empty())
}

/// Comma-separated sender ids; spaces and quotes around each id are
/// stripped and empty items dropped.
pub fn parse_user_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().trim_matches(|c: char| c == '"' || c == '\'').trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
