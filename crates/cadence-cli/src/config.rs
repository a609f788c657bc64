//! `cadence.toml` loading.
//!
//! Every section is optional; missing values fall back to the defaults
//! below. API keys may instead come from `CADENCE_PROVIDER_API_KEY` and
//! `CADENCE_ASSESSOR_API_KEY`, which win over the file.

use cadence_orchestrator::{OrchestratorConfig, PartitionPolicy, RunnerConfig, SchedulerConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const PROVIDER_KEY_ENV: &str = "CADENCE_PROVIDER_API_KEY";
pub const ASSESSOR_KEY_ENV: &str = "CADENCE_ASSESSOR_API_KEY";

#[derive(Debug, Deserialize)]
pub struct CadenceConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub assessor: AssessorSection,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub partition: PartitionPolicy,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_rps")]
    pub max_requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub max_burst: f64,
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Rate-limit buckets idle this long are dropped.
    #[serde(default = "default_idle_client_secs")]
    pub idle_client_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: default_rps(),
            max_burst: default_burst(),
            api_keys: vec![],
            idle_client_secs: default_idle_client_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProviderSection {
    #[serde(default = "default_provider_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AssessorSection {
    #[serde(default = "default_assessor_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model_id: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AssessorSection {
    fn default() -> Self {
        Self {
            api_base_url: default_assessor_url(),
            api_key: String::new(),
            model_id: default_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChannelsConfig {
    /// Log every notification through `tracing`.
    #[serde(default = "default_true")]
    pub log: bool,
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    #[serde(default = "default_channel_timeout")]
    pub timeout_secs: u64,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            log: true,
            slack_webhook_url: None,
            timeout_secs: default_channel_timeout(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_rps() -> f64 {
    10.0
}
fn default_burst() -> f64 {
    50.0
}
fn default_idle_client_secs() -> u64 {
    600
}
fn default_provider_url() -> String {
    "http://127.0.0.1:8025".to_string()
}
fn default_assessor_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_true() -> bool {
    true
}
fn default_channel_timeout() -> u64 {
    10
}

impl CadenceConfig {
    /// Parse `raw` and apply environment overrides through `env`.
    pub fn parse(raw: &str, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config: CadenceConfig = toml::from_str(raw)?;
        if let Some(key) = env(PROVIDER_KEY_ENV).filter(|k| !k.is_empty()) {
            config.provider.api_key = key;
        }
        if let Some(key) = env(ASSESSOR_KEY_ENV).filter(|k| !k.is_empty()) {
            config.assessor.api_key = key;
        }
        Ok(config)
    }

    /// Read the file at `path`. A missing file means all defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                String::new()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ))
            }
        };
        Self::parse(&raw, |name| std::env::var(name).ok())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("cadence.db")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = CadenceConfig::parse("", |_| None).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.partition, PartitionPolicy::EqualSplit);
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert!(config.channels.log);
        assert!(config.security.api_keys.is_empty());
        assert_eq!(config.security.idle_client_secs, 600);
        assert_eq!(config.database_path(), PathBuf::from("./data/cadence.db"));
    }

    #[test]
    fn test_sections_override_defaults() {
        let raw = r#"
            data_dir = "/var/lib/cadence"

            [server]
            port = 8080

            [security]
            idle_client_secs = 120

            [partition]
            policy = "weighted"
            weights = [5, 3, 2]

            [scheduler]
            wrap_up_delay_minutes = 60

            [channels]
            slack_webhook_url = "https://hooks.slack.test/T000"
        "#;
        let config = CadenceConfig::parse(raw, |_| None).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.security.idle_client_secs, 120);
        assert_eq!(config.security.max_burst, 50.0);
        assert_eq!(
            config.partition,
            PartitionPolicy::Weighted {
                weights: vec![5, 3, 2]
            }
        );
        assert_eq!(config.scheduler.wrap_up_delay_minutes, 60);
        assert_eq!(config.scheduler.countdown_lead_minutes, 15);
        assert!(config.channels.slack_webhook_url.is_some());
    }

    #[test]
    fn test_env_keys_win() {
        let raw = r#"
            [provider]
            api_key = "from-file"
        "#;
        let config = CadenceConfig::parse(raw, |name| match name {
            PROVIDER_KEY_ENV => Some("from-env".into()),
            ASSESSOR_KEY_ENV => Some(String::new()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.provider.api_key, "from-env");
        assert_eq!(config.assessor.api_key, "");
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let raw = r#"
            [partition]
            policy = "random"
        "#;
        assert!(CadenceConfig::parse(raw, |_| None).is_err());
    }

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CadenceConfig::load(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
    }
}
