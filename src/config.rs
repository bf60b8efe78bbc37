//! Configuration management for promptgate.
//!
//! Loads settings from `~/.config/promptgate/config.toml`, then applies
//! environment overrides. CLI flags are applied last by `main`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::capabilities::DEFAULT_CATALOG_TTL;
use crate::upstream::transport::RetryPolicy;

pub const DEFAULT_RESPONSES_URL: &str = "https://api.openai.com/v1/responses";
pub const DEFAULT_MODELS_URL: &str = "https://api.openai.com/v1/models";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub service_secret: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_enqueue_wait_ms")]
    pub enqueue_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub provider_key: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_catalog_ttl_secs")]
    pub catalog_ttl_secs: u64,
    #[serde(default = "default_responses_url")]
    pub responses_url: String,
    #[serde(default = "default_models_url")]
    pub models_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatcherConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

// Default value functions
fn default_port() -> u16 { 8080 }
fn default_request_timeout_secs() -> u64 { 90 }
fn default_enqueue_wait_ms() -> u64 { 100 }
fn default_model() -> String { "gpt-4.1".to_string() }
fn default_max_output_tokens() -> u32 { 1024 }
fn default_temperature() -> f32 { 0.7 }
fn default_poll_timeout_secs() -> u64 { 60 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_max_attempts() -> u32 { 4 }
fn default_backoff_base_ms() -> u64 { 250 }
fn default_backoff_max_ms() -> u64 { 4000 }
fn default_catalog_ttl_secs() -> u64 { DEFAULT_CATALOG_TTL.as_secs() }
fn default_responses_url() -> String { DEFAULT_RESPONSES_URL.to_string() }
fn default_models_url() -> String { DEFAULT_MODELS_URL.to_string() }
fn default_worker_count() -> usize { 4 }
fn default_queue_size() -> usize { 32 }
fn default_log_level() -> String { "info".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            service_secret: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            enqueue_wait_ms: default_enqueue_wait_ms(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            provider_key: String::new(),
            default_model: default_model(),
            system_prompt: String::new(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            poll_timeout_secs: default_poll_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            catalog_ttl_secs: default_catalog_ttl_secs(),
            responses_url: default_responses_url(),
            models_url: default_models_url(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_size: default_queue_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn enqueue_wait(&self) -> Duration {
        Duration::from_millis(self.enqueue_wait_ms)
    }
}

impl UpstreamConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

impl Config {
    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("promptgate")
            .join("config.toml")
    }

    /// Load config from file, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path())
    }

    /// Load config from a specific path.
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(secret) = std::env::var("PROMPTGATE_SECRET") {
            self.server.service_secret = secret;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.upstream.provider_key = key;
        }
        if let Ok(prompt) = std::env::var("PROMPTGATE_SYSTEM_PROMPT") {
            self.upstream.system_prompt = prompt;
        }
        if let Ok(model) = std::env::var("PROMPTGATE_DEFAULT_MODEL") {
            self.upstream.default_model = model;
        }
        if let Ok(level) = std::env::var("PROMPTGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        override_parsed("PROMPTGATE_PORT", &mut self.server.port);
        override_parsed("PROMPTGATE_REQUEST_TIMEOUT", &mut self.server.request_timeout_secs);
        override_parsed("PROMPTGATE_POLL_TIMEOUT", &mut self.upstream.poll_timeout_secs);
        override_parsed("PROMPTGATE_MAX_OUTPUT_TOKENS", &mut self.upstream.max_output_tokens);
        override_parsed("PROMPTGATE_WORKERS", &mut self.dispatcher.worker_count);
        override_parsed("PROMPTGATE_QUEUE_SIZE", &mut self.dispatcher.queue_size);
        self
    }

    /// Check the settings the server cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.service_secret.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "service secret is required (PROMPTGATE_SECRET)".to_string(),
            ));
        }
        if self.upstream.provider_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "provider key is required (OPENAI_API_KEY)".to_string(),
            ));
        }
        if self.dispatcher.worker_count == 0 || self.dispatcher.queue_size == 0 {
            return Err(ConfigError::Invalid(
                "worker_count and queue_size must be greater than zero".to_string(),
            ));
        }
        if self.server.request_timeout_secs == 0 || self.upstream.poll_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be greater than zero".to_string()));
        }
        if self.upstream.poll_interval_ms == 0 || self.upstream.backoff_base_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms and backoff_base_ms must be greater than zero".to_string(),
            ));
        }
        if self.upstream.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Copy of the config safe to print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.server.service_secret = redact(&copy.server.service_secret);
        copy.upstream.provider_key = redact(&copy.upstream.provider_key);
        copy
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(val) = std::env::var(var) {
        match val.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(var, value = %val, "ignoring unparsable environment override"),
        }
    }
}

fn redact(value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        "********".to_string()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
