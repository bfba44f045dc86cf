//! BindSync configuration management
//!
//! Configuration comes from an optional TOML file overlaid with environment
//! variables. Platform sections are optional individually, but every section
//! that is present must be complete and at least one must exist.

use crate::error::{Error, Result};
use crate::store::FileStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main BindSync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// REST facade configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Telegram bot, if relayed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<TelegramConfig>,

    /// Discord bot, if relayed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<DiscordConfig>,

    /// Slack app, if relayed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackConfig>,
}

/// REST facade configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed CORS origins (empty = any)
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_origins: Vec::new(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for messages, tokens and the admin account
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: FileStore::default_dir(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout() -> u64 {
    25
}

fn default_discord_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_discord_gateway() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
}

fn default_slack_api_base() -> String {
    "https://slack.com/api".to_string()
}

/// Telegram channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token
    #[serde(default)]
    pub bot_token: String,

    /// The one relayed chat
    #[serde(default)]
    pub chat_id: i64,

    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    /// Long-poll timeout for getUpdates
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>, chat_id: i64) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id,
            api_base: default_telegram_api_base(),
            poll_timeout_secs: default_poll_timeout(),
            request_timeout_secs: default_request_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

/// Discord channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Bot token (sent as `Authorization: Bot <token>`)
    #[serde(default)]
    pub bot_token: String,

    /// The one relayed channel
    #[serde(default)]
    pub channel_id: u64,

    #[serde(default = "default_discord_api_base")]
    pub api_base: String,

    #[serde(default = "default_discord_gateway")]
    pub gateway_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

impl DiscordConfig {
    pub fn new(bot_token: impl Into<String>, channel_id: u64) -> Self {
        Self {
            bot_token: bot_token.into(),
            channel_id,
            api_base: default_discord_api_base(),
            gateway_url: default_discord_gateway(),
            request_timeout_secs: default_request_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

/// Slack channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Bot token (`xoxb-`), used for Web API calls
    #[serde(default)]
    pub bot_token: String,

    /// App-level token (`xapp-`), used to open Socket Mode sessions
    #[serde(default)]
    pub app_token: String,

    /// The one relayed channel
    #[serde(default)]
    pub channel_id: String,

    #[serde(default = "default_slack_api_base")]
    pub api_base: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

impl SlackConfig {
    pub fn new(
        bot_token: impl Into<String>,
        app_token: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            bot_token: bot_token.into(),
            app_token: app_token.into(),
            channel_id: channel_id.into(),
            api_base: default_slack_api_base(),
            request_timeout_secs: default_request_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

impl BridgeConfig {
    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                tracing::warn!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML file without environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Overlay environment variables read through `get`.
    ///
    /// A platform section is created when any of its variables is set.
    pub fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = get("API_PORT") {
            self.api.port = parse_env("API_PORT", &port)?;
        }
        if let Some(dir) = get("BINDSYNC_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }

        let tg_token = get("TELEGRAM_BOT_TOKEN");
        let tg_chat = get("TELEGRAM_CHAT_ID");
        if tg_token.is_some() || tg_chat.is_some() {
            let section = self
                .telegram
                .get_or_insert_with(|| TelegramConfig::new("", 0));
            if let Some(token) = tg_token {
                section.bot_token = token;
            }
            if let Some(chat) = tg_chat {
                section.chat_id = parse_env("TELEGRAM_CHAT_ID", &chat)?;
            }
        }

        let dc_token = get("DISCORD_BOT_TOKEN");
        let dc_channel = get("DISCORD_CHANNEL_ID");
        if dc_token.is_some() || dc_channel.is_some() {
            let section = self.discord.get_or_insert_with(|| DiscordConfig::new("", 0));
            if let Some(token) = dc_token {
                section.bot_token = token;
            }
            if let Some(channel) = dc_channel {
                section.channel_id = parse_env("DISCORD_CHANNEL_ID", &channel)?;
            }
        }

        let sk_bot = get("SLACK_BOT_TOKEN");
        let sk_app = get("SLACK_APP_TOKEN");
        let sk_channel = get("SLACK_CHANNEL_ID");
        if sk_bot.is_some() || sk_app.is_some() || sk_channel.is_some() {
            let section = self
                .slack
                .get_or_insert_with(|| SlackConfig::new("", "", ""));
            if let Some(token) = sk_bot {
                section.bot_token = token;
            }
            if let Some(token) = sk_app {
                section.app_token = token;
            }
            if let Some(channel) = sk_channel {
                section.channel_id = channel;
            }
        }

        Ok(())
    }

    /// Check every present platform section is complete.
    ///
    /// Reports all missing settings at once, by their environment name.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();

        if let Some(tg) = &self.telegram {
            if tg.bot_token.trim().is_empty() {
                missing.push("TELEGRAM_BOT_TOKEN");
            }
            if tg.chat_id == 0 {
                missing.push("TELEGRAM_CHAT_ID");
            }
        }
        if let Some(dc) = &self.discord {
            if dc.bot_token.trim().is_empty() {
                missing.push("DISCORD_BOT_TOKEN");
            }
            if dc.channel_id == 0 {
                missing.push("DISCORD_CHANNEL_ID");
            }
        }
        if let Some(sk) = &self.slack {
            if sk.bot_token.trim().is_empty() {
                missing.push("SLACK_BOT_TOKEN");
            }
            if sk.app_token.trim().is_empty() {
                missing.push("SLACK_APP_TOKEN");
            }
            if sk.channel_id.trim().is_empty() {
                missing.push("SLACK_CHANNEL_ID");
            }
        }

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "Missing environment variables: {}",
                missing.join(", ")
            )));
        }
        if self.platform_count() == 0 {
            return Err(Error::Config(
                "No platform configured: set TELEGRAM_*, DISCORD_* or SLACK_* variables"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Number of configured platform sections
    pub fn platform_count(&self) -> usize {
        [
            self.telegram.is_some(),
            self.discord.is_some(),
            self.slack.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has an invalid value: {}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.api.port, 8000);
        assert_eq!(config.api.host, "127.0.0.1");
        assert!(config.telegram.is_none());
        assert_eq!(config.platform_count(), 0);
        assert!(config.storage.data_dir.ends_with(".bindsync"));
    }

    #[test]
    fn test_parse_toml_with_defaults() {
        let config = BridgeConfig::from_toml(
            r#"
            [api]
            port = 9000

            [discord]
            bot_token = "abc"
            channel_id = 1203374842210062397
            "#,
        )
        .unwrap();
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.host, "127.0.0.1");
        let discord = config.discord.unwrap();
        assert_eq!(discord.channel_id, 1203374842210062397);
        assert_eq!(discord.api_base, "https://discord.com/api/v10");
        assert_eq!(discord.request_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_toml() {
        let err = BridgeConfig::from_toml("[api\nport = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_creates_sections() {
        let mut config = BridgeConfig::default();
        config
            .apply_env_from(env(&[
                ("TELEGRAM_BOT_TOKEN", "tg-token"),
                ("TELEGRAM_CHAT_ID", "-1001234"),
                ("SLACK_BOT_TOKEN", "xoxb-1"),
                ("SLACK_APP_TOKEN", "xapp-1"),
                ("SLACK_CHANNEL_ID", "C123"),
                ("API_PORT", "8080"),
            ]))
            .unwrap();

        assert_eq!(config.telegram.as_ref().unwrap().chat_id, -1001234);
        assert_eq!(config.slack.as_ref().unwrap().channel_id, "C123");
        assert!(config.discord.is_none());
        assert_eq!(config.api.port, 8080);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = BridgeConfig::from_toml(
            r#"
            [telegram]
            bot_token = "from-file"
            chat_id = 5
            "#,
        )
        .unwrap();
        config
            .apply_env_from(env(&[("TELEGRAM_BOT_TOKEN", "from-env")]))
            .unwrap();
        let tg = config.telegram.unwrap();
        assert_eq!(tg.bot_token, "from-env");
        assert_eq!(tg.chat_id, 5);
    }

    #[test]
    fn test_env_invalid_number() {
        let mut config = BridgeConfig::default();
        let err = config
            .apply_env_from(env(&[("DISCORD_CHANNEL_ID", "general")]))
            .unwrap_err();
        assert!(err.to_string().contains("DISCORD_CHANNEL_ID"));
    }

    #[test]
    fn test_validate_lists_every_missing_variable() {
        let mut config = BridgeConfig::default();
        config
            .apply_env_from(env(&[
                ("DISCORD_BOT_TOKEN", "dc"),
                ("SLACK_CHANNEL_ID", "C1"),
            ]))
            .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("DISCORD_CHANNEL_ID"));
        assert!(err.contains("SLACK_BOT_TOKEN"));
        assert!(err.contains("SLACK_APP_TOKEN"));
        assert!(!err.contains("TELEGRAM"));
    }

    #[test]
    fn test_validate_requires_a_platform() {
        let err = BridgeConfig::default().validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_toml_round_trip_omits_absent_platforms() {
        let mut config = BridgeConfig::default();
        config.slack = Some(SlackConfig::new("xoxb", "xapp", "C1"));
        let text = config.to_toml().unwrap();
        assert!(text.contains("[slack]"));
        assert!(!text.contains("[telegram]"));
        let parsed = BridgeConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.slack.unwrap().channel_id, "C1");
    }
}
