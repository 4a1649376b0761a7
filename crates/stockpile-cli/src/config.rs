//! Configuration loading from TOML files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use stockpile_core::{ConflictPolicy, RetryPolicy, S3Settings, DEFAULT_BATCH_SIZE};
use stockpile_kafka::KafkaConfig;

/// Global configuration for stockpile
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub kafka: KafkaSection,
    pub aws: AwsSection,
    pub batch: BatchSection,
    pub output: OutputSection,
    pub retry: RetrySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaSection {
    pub bootstrap_servers: String,
    pub topic: String,
    pub group_id: String,
    pub auto_offset_reset: String,
    pub poll_timeout_ms: u64,
    /// 0 = wait for messages forever
    pub idle_timeout_secs: u64,
    pub properties: BTreeMap<String, String>,
}

impl Default for KafkaSection {
    fn default() -> Self {
        Self {
            bootstrap_servers: "stock-data-stream:9092".to_string(),
            topic: "stock-quotes".to_string(),
            group_id: "stockpile".to_string(),
            auto_offset_reset: "earliest".to_string(),
            poll_timeout_ms: 1000,
            idle_timeout_secs: 0,
            properties: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AwsSection {
    pub bucket: String,
    pub prefix: String,
    pub region: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub access_key_id: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub secret_access_key: Option<String>,
    pub endpoint: Option<String>,
    pub allow_http: bool,
}

impl Default for AwsSection {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
            region: "us-east-1".to_string(),
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
            endpoint: None,
            allow_http: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    pub size: usize,
    pub drain_on_close: bool,
    pub file_stem: String,
    pub conflict_policy: ConflictPolicy,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            size: DEFAULT_BATCH_SIZE,
            drain_on_close: true,
            file_stem: stockpile_core::DEFAULT_FILE_STEM.to_string(),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub compression_level: i32,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            compression_level: stockpile_core::DEFAULT_ZSTD_LEVEL,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./stockpile.toml (current directory)
    /// 2. ~/.config/stockpile/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("stockpile.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "stockpile") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn kafka_config(&self) -> KafkaConfig {
        let k = &self.kafka;
        KafkaConfig {
            bootstrap_servers: k.bootstrap_servers.clone(),
            topic: k.topic.clone(),
            group_id: k.group_id.clone(),
            auto_offset_reset: k.auto_offset_reset.clone(),
            poll_timeout: Duration::from_millis(k.poll_timeout_ms.max(1)),
            idle_timeout: (k.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(k.idle_timeout_secs)),
            properties: k.properties.clone(),
        }
    }

    pub fn s3_settings(&self) -> S3Settings {
        let a = &self.aws;
        S3Settings {
            bucket: a.bucket.clone(),
            region: a.region.clone(),
            access_key_id: a.access_key_id.clone(),
            secret_access_key: a.secret_access_key.clone(),
            endpoint: a.endpoint.clone().filter(|e| !e.is_empty()),
            allow_http: a.allow_http,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
        }
    }
}
