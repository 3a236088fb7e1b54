use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub documentation: DocumentationConfig,
    pub billing: BillingConfig,
    pub session: SessionDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

/// AI medical session socket settings
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentationConfig {
    /// Base socket URL, e.g. `wss://api.example.com/ws/medical/`
    pub url: String,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    /// Frames/requests held while reconnecting
    #[serde(default = "default_backlog_capacity")]
    pub backlog_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// REST API root; records are posted to `<api_url>/billing/`
    pub api_url: String,
    pub cost_bearer: String,
    pub expertise: String,
    #[serde(default = "default_billing_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionDefaults {
    pub app_id: String,
    #[serde(default = "default_cap_secs")]
    pub cap_secs: u64,
    #[serde(default)]
    pub video: bool,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_ms() -> u64 {
    500
}

fn default_backlog_capacity() -> usize {
    64
}

fn default_billing_timeout_secs() -> u64 {
    10
}

fn default_cap_secs() -> u64 {
    900
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_buffer_size() -> usize {
    2048
}

impl Config {
    /// Load from a config file (extension optional), overridden by
    /// `CONSULT__SECTION__KEY` environment variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("CONSULT").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }
}
