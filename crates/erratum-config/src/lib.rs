use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Server,
    pub telegram: Telegram,
    #[serde(default)]
    pub admins: Vec<i64>,
    #[serde(default)]
    pub monitoring: Option<Monitoring>,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub notices: Notices,
    pub registry: Vec<RegistryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telegram {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    pub mode: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default)]
    pub webhook: Option<Webhook>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub public_url: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitoring {
    pub chat_id: i64,
    #[serde(default)]
    pub topic_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notices {
    #[serde(default = "default_ack_ttl_secs")]
    pub ack_ttl_secs: u64,
    #[serde(default = "default_done_ttl_secs")]
    pub done_ttl_secs: u64,
    #[serde(default = "default_cancel_ttl_secs")]
    pub cancel_ttl_secs: u64,
}

impl Default for Notices {
    fn default() -> Self {
        Self {
            ack_ttl_secs: default_ack_ttl_secs(),
            done_ttl_secs: default_done_ttl_secs(),
            cancel_ttl_secs: default_cancel_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub code: String,
    pub label: String,
    #[serde(default)]
    pub destination: i64,
}

impl Config {
    pub fn is_webhook(&self) -> bool {
        self.telegram.mode == "webhook"
    }

    /// Monitoring feed chat and optional topic, if one is configured.
    pub fn monitoring_feed(&self) -> Option<(i64, Option<i64>)> {
        self.monitoring
            .as_ref()
            .filter(|m| m.chat_id != 0)
            .map(|m| (m.chat_id, (m.topic_id != 0).then_some(m.topic_id)))
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_token_env() -> String {
    "BOT_TOKEN".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_cooldown_secs() -> u64 {
    3
}

fn default_ack_ttl_secs() -> u64 {
    15
}

fn default_done_ttl_secs() -> u64 {
    10
}

fn default_cancel_ttl_secs() -> u64 {
    7
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    match cfg.telegram.mode.as_str() {
        "polling" => {}
        "webhook" => {
            let webhook = cfg.telegram.webhook.as_ref().ok_or_else(|| {
                ConfigError::UnsupportedConfig(
                    "telegram.webhook is required when telegram.mode=webhook".to_string(),
                )
            })?;
            if webhook.secret.trim().is_empty() || webhook.public_url.trim().is_empty() {
                return Err(ConfigError::UnsupportedConfig(
                    "telegram.webhook.secret and public_url must be non-empty".to_string(),
                ));
            }
            if !webhook
                .secret
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(ConfigError::UnsupportedConfig(
                    "telegram.webhook.secret may only contain A-Z, a-z, 0-9, _ and -".to_string(),
                ));
            }
        }
        other => {
            return Err(ConfigError::UnsupportedConfig(format!(
                "telegram.mode={other} is not implemented; supported: polling, webhook"
            )))
        }
    }
    if cfg.limits.cooldown_secs == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "limits.cooldown_secs must be >= 1".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for entry in &cfg.registry {
        if entry.code.is_empty()
            || entry.code.contains('#')
            || entry.code.chars().any(char::is_whitespace)
            || entry.code.to_lowercase() != entry.code
        {
            return Err(ConfigError::UnsupportedConfig(format!(
                "registry code {:?} must be lower-case without whitespace or '#'",
                entry.code
            )));
        }
        if entry.label.trim().is_empty() {
            return Err(ConfigError::UnsupportedConfig(format!(
                "registry entry {} has an empty label",
                entry.code
            )));
        }
        if !seen.insert(entry.code.as_str()) {
            return Err(ConfigError::UnsupportedConfig(format!(
                "registry code {} is declared twice",
                entry.code
            )));
        }
    }
    Ok(())
}
