// src/config/mod.rs
//! Runtime configuration.
//!
//! Lookup order: `$RELAY_CONFIG_PATH` → `config/relay.toml` → built-in defaults.
//! Secrets come from the environment (a `.env` file is honored) and override the file.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PATH: &str = "RELAY_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/relay.toml";

pub const DEFAULT_TOPICS: [&str; 6] = [
    "igwn.gwalert",
    "gcn.notices.swift.bat.guano",
    "gcn.classic.text.FERMI_GBM_ALERT",
    "gcn.classic.text.FERMI_GBM_FLT_POS",
    "gcn.classic.text.FERMI_GBM_GND_POS",
    "gcn.classic.text.FERMI_GBM_FIN_POS",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub telegram_token: Option<String>,
    /// Chat registered at startup so the operator always receives alerts.
    pub admin_chat_id: Option<String>,
    pub gcn_client_id: Option<String>,
    pub gcn_client_secret: Option<String>,
    pub kafka_domain: String,
    pub kafka_group_id: String,
    pub topics: Vec<String>,

    pub state_dir: PathBuf,
    pub cursor_flush_secs: u64,
    pub stream_backoff_secs: u64,
    pub stream_poll_timeout_ms: u64,

    pub bulletin_index_url: String,
    pub bulletin_base_url: String,
    pub bulletin_poll_secs: u64,
    pub bulletin_index_cap: usize,

    /// Loopback port held for the process lifetime; also serves /health and /metrics.
    pub lock_port: u16,
    pub recent_alerts: usize,

    /// Per-request timeout and attempt count for Bot API calls.
    pub telegram_timeout_secs: u64,
    pub telegram_retries: u8,
    /// Timeout for circulars pages and alert images.
    pub http_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telegram_token: None,
            admin_chat_id: None,
            gcn_client_id: None,
            gcn_client_secret: None,
            kafka_domain: "gcn.nasa.gov".into(),
            kafka_group_id: "gcn2telegram_plus".into(),
            topics: DEFAULT_TOPICS.iter().map(|s| s.to_string()).collect(),
            state_dir: PathBuf::from("."),
            cursor_flush_secs: 10,
            stream_backoff_secs: 5,
            stream_poll_timeout_ms: 1000,
            bulletin_index_url: "https://gcn.nasa.gov/circulars".into(),
            bulletin_base_url: "https://gcn.nasa.gov".into(),
            bulletin_poll_secs: 120,
            bulletin_index_cap: crate::bulletin::DEFAULT_INDEX_CAP,
            lock_port: 54673,
            recent_alerts: 32,
            telegram_timeout_secs: 30,
            telegram_retries: 3,
            http_timeout_secs: 30,
        }
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(s).context("parsing relay config")?;
        Ok(cfg.sanitized())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// File lookup plus environment overrides.
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else if Path::new(DEFAULT_PATH).exists() {
            Self::load_from(Path::new(DEFAULT_PATH))?
        } else {
            Self::default()
        };
        Ok(base.with_env_overrides().sanitized())
    }

    pub fn with_env_overrides(mut self) -> Self {
        let env = |k: &str| non_empty(std::env::var(k).ok());
        if let Some(v) = env("TELEGRAM_BOT_TOKEN") {
            self.telegram_token = Some(v);
        }
        if let Some(v) = env("ADMIN_CHAT_ID") {
            self.admin_chat_id = Some(v);
        }
        if let Some(v) = env("GCN_CLIENT_ID") {
            self.gcn_client_id = Some(v);
        }
        if let Some(v) = env("GCN_CLIENT_SECRET") {
            self.gcn_client_secret = Some(v);
        }
        self
    }

    /// Clamps values that would stall a loop or empty a buffer.
    pub fn sanitized(mut self) -> Self {
        self.telegram_token = non_empty(self.telegram_token.take());
        self.admin_chat_id = non_empty(self.admin_chat_id.take());
        self.gcn_client_id = non_empty(self.gcn_client_id.take());
        self.gcn_client_secret = non_empty(self.gcn_client_secret.take());

        self.topics = self
            .topics
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if self.topics.is_empty() {
            self.topics = DEFAULT_TOPICS.iter().map(|s| s.to_string()).collect();
        }

        self.cursor_flush_secs = self.cursor_flush_secs.max(1);
        self.stream_backoff_secs = self.stream_backoff_secs.max(1);
        self.stream_poll_timeout_ms = self.stream_poll_timeout_ms.max(1);
        self.bulletin_poll_secs = self.bulletin_poll_secs.max(1);
        self.bulletin_index_cap = self.bulletin_index_cap.max(1);
        self.recent_alerts = self.recent_alerts.max(1);
        self.telegram_timeout_secs = self.telegram_timeout_secs.max(1);
        self.telegram_retries = self.telegram_retries.max(1);
        self.http_timeout_secs = self.http_timeout_secs.max(1);
        self
    }

    /// The bot token is the one mandatory setting.
    pub fn require_token(&self) -> Result<&str> {
        self.telegram_token
            .as_deref()
            .ok_or_else(|| anyhow!("TELEGRAM_BOT_TOKEN is not set"))
    }

    /// Client credentials for the alert stream, when both are present.
    pub fn gcn_credentials(&self) -> Option<(&str, &str)> {
        Some((self.gcn_client_id.as_deref()?, self.gcn_client_secret.as_deref()?))
    }

    pub fn stream_settings(&self) -> crate::stream::ConsumerSettings {
        crate::stream::ConsumerSettings {
            poll_timeout: Duration::from_millis(self.stream_poll_timeout_ms),
            flush_every: Duration::from_secs(self.cursor_flush_secs),
            backoff: Duration::from_secs(self.stream_backoff_secs),
        }
    }

    pub fn bulletin_interval(&self) -> Duration {
        Duration::from_secs(self.bulletin_poll_secs)
    }
}
