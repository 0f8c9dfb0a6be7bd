// src/config/mod.rs - Enhancer configuration (YAML or TOML file, environment overrides)

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::types::EnhancerError;

pub const DEFAULT_CONFIG_PATH: &str = "chatplus.yaml";

/// Top-level configuration. Every section and field has a default, so an
/// empty file (or no file) is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancerConfig {
    pub storage: StorageConfig,
    pub chat: ChatConfig,
    pub startup: StartupConfig,
    pub filters: FiltersConfig,
    pub emotes: EmotesConfig,
    pub badges: BadgesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Key of the single persisted state blob
    pub key: String,
    pub state_dir: PathBuf,
    /// Raw cookie string checked once for the legacy mute list
    pub legacy_cookie: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key: "ppv-chat-enhancer-state".to_string(),
            state_dir: PathBuf::from(".chatplus"),
            legacy_cookie: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Retained message nodes after each batch
    pub max_messages: usize,
    pub selectors: SelectorConfig,
    pub user_id_attribute: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_messages: 150,
            selectors: SelectorConfig::default(),
            user_id_attribute: "data-user-id".to_string(),
        }
    }
}

/// Host markup conventions. Lists are tried in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub list: Vec<String>,
    pub message: String,
    pub user: Vec<String>,
    pub text: Vec<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            list: vec![
                "#message-list".to_string(),
                "#message-cont".to_string(),
                ".chat-message-list".to_string(),
                ".chat-body".to_string(),
            ],
            message: ".message, .chat-message".to_string(),
            user: vec!["[data-user-id]".to_string(), ".username".to_string()],
            text: vec![".message-text".to_string(), "span:last-child".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_attempts: 120,
        }
    }
}

impl StartupConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// What a filter hit does to a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Replace each occurrence with the mask token
    #[default]
    Redact,
    /// Suppress the whole message
    Hide,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    pub mask: String,
    pub mode: FilterMode,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            mask: "***".to_string(),
            mode: FilterMode::Redact,
        }
    }
}

/// One remote emote endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub url: String,
    /// Image URL with an `{id}` placeholder
    pub image_template: String,
    pub code_field: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
}

fn default_id_field() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotesConfig {
    pub enabled: bool,
    pub case_sensitive: bool,
    /// Priority order: the first provider wins on duplicate codes
    pub providers: Vec<ProviderConfig>,
}

impl Default for EmotesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            case_sensitive: true,
            providers: vec![
                ProviderConfig {
                    name: "bttv".to_string(),
                    url: "https://api.betterttv.net/3/cached/emotes/global".to_string(),
                    image_template: "https://cdn.betterttv.net/emote/{id}/1x".to_string(),
                    code_field: "code".to_string(),
                    id_field: default_id_field(),
                },
                ProviderConfig {
                    name: "7tv".to_string(),
                    url: "https://api.7tv.app/v2/emotes/global".to_string(),
                    image_template: "https://cdn.7tv.app/emote/{id}/1x.webp".to_string(),
                    code_field: "name".to_string(),
                    id_field: default_id_field(),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BadgesConfig {
    /// Namespace for badge keys injected into the host dictionary
    pub prefix: String,
}

impl Default for BadgesConfig {
    fn default() -> Self {
        Self {
            prefix: "chat-enhancer-team-".to_string(),
        }
    }
}

impl EnhancerConfig {
    /// Load from a `.yaml`/`.yml` or `.toml` file. A missing file yields defaults.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&content, path)?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);

        let config: Self = match extension.as_deref() {
            Some("toml") => toml::from_str(content)
                .with_context(|| format!("Invalid TOML in {}", path.display()))?,
            Some("yaml") | Some("yml") | None => serde_yaml::from_str(content)
                .with_context(|| format!("Invalid YAML in {}", path.display()))?,
            Some(other) => {
                return Err(EnhancerError::Config(format!("unsupported config format '.{}'", other)).into())
            }
        };
        Ok(config)
    }

    /// Resolve the config path from `CHATPLUS_CONFIG`, load it, apply the
    /// remaining environment overrides and validate.
    pub async fn from_env() -> Result<Self> {
        let path = std::env::var("CHATPLUS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load(&path).await?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CHATPLUS_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), EnhancerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("CHATPLUS_STATE_DIR") {
            self.storage.state_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup("CHATPLUS_MAX_MESSAGES") {
            self.chat.max_messages = raw.trim().parse().map_err(|_| {
                EnhancerError::Config(format!("CHATPLUS_MAX_MESSAGES must be a number, got '{}'", raw))
            })?;
        }

        if let Some(raw) = lookup("CHATPLUS_EMOTES") {
            self.emotes.enabled = match raw.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => {
                    return Err(EnhancerError::Config(format!(
                        "CHATPLUS_EMOTES must be true or false, got '{}'",
                        raw
                    )))
                }
            };
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), EnhancerError> {
        if self.storage.key.trim().is_empty() {
            return Err(EnhancerError::Config("storage.key must not be empty".to_string()));
        }
        if self.chat.max_messages == 0 {
            return Err(EnhancerError::Config("chat.max_messages must be at least 1".to_string()));
        }
        if self.chat.selectors.list.is_empty() {
            return Err(EnhancerError::Config("chat.selectors.list must name at least one container".to_string()));
        }
        if self.startup.max_attempts == 0 || self.startup.poll_interval_ms == 0 {
            return Err(EnhancerError::Config(
                "startup.max_attempts and startup.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.filters.mask.is_empty() {
            return Err(EnhancerError::Config("filters.mask must not be empty".to_string()));
        }
        for provider in &self.emotes.providers {
            if !provider.image_template.contains("{id}") {
                return Err(EnhancerError::Config(format!(
                    "emote provider '{}' image_template has no {{id}} placeholder",
                    provider.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = EnhancerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chat.max_messages, 150);
        assert_eq!(config.startup.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.emotes.providers[0].name, "bttv");
        assert!(config.emotes.case_sensitive);
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = EnhancerConfig::load(dir.path().join("absent.yaml")).await.unwrap();
        assert_eq!(config, EnhancerConfig::default());
    }

    #[tokio::test]
    async fn test_yaml_partial_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chatplus.yaml");
        std::fs::write(&path, "chat:\n  max_messages: 40\nfilters:\n  mode: hide\n").unwrap();

        let config = EnhancerConfig::load(&path).await.unwrap();
        assert_eq!(config.chat.max_messages, 40);
        assert_eq!(config.filters.mode, FilterMode::Hide);
        assert_eq!(config.filters.mask, "***");
        assert_eq!(config.chat.user_id_attribute, "data-user-id");
    }

    #[tokio::test]
    async fn test_toml_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chatplus.toml");
        std::fs::write(
            &path,
            "[emotes]\nenabled = false\n\n[badges]\nprefix = \"fan-\"\n",
        )
        .unwrap();

        let config = EnhancerConfig::load(&path).await.unwrap();
        assert!(!config.emotes.enabled);
        assert_eq!(config.emotes.providers.len(), 2);
        assert_eq!(config.badges.prefix, "fan-");
    }

    #[tokio::test]
    async fn test_unknown_extension_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chatplus.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(EnhancerConfig::load(&path).await.is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CHATPLUS_STATE_DIR", "/tmp/chatplus"),
            ("CHATPLUS_MAX_MESSAGES", "25"),
            ("CHATPLUS_EMOTES", "off"),
        ]
        .into_iter()
        .collect();

        let mut config = EnhancerConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.storage.state_dir, PathBuf::from("/tmp/chatplus"));
        assert_eq!(config.chat.max_messages, 25);
        assert!(!config.emotes.enabled);

        let bad = config.apply_overrides(|key| (key == "CHATPLUS_MAX_MESSAGES").then(|| "many".to_string()));
        assert!(matches!(bad, Err(EnhancerError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EnhancerConfig::default();
        config.chat.max_messages = 0;
        assert!(config.validate().is_err());

        let mut config = EnhancerConfig::default();
        config.emotes.providers[1].image_template = "https://cdn.example/emote.png".to_string();
        assert!(config.validate().is_err());
    }
}
