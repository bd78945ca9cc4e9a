use std::collections::HashMap;
use std::path::Path;

use config::{Config, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct MultisendConfig {
    pub rpc: RpcConfig,
    pub account: AccountConfig,
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub delay: DelayConfig,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_confirmation_poll_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    pub endpoints: Vec<String>,
    pub chain_id: u64,
    #[serde(default = "default_confirmation_poll_ms")]
    pub confirmation_poll_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub private_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub stale_after_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_attempts: 5,
            stale_after_secs: 180,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    pub mode: DelayMode,
    pub seconds: f64,
    pub min_seconds: f64,
    pub max_seconds: f64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DelayMode {
    #[default]
    None,
    Fixed,
    Random,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default)]
    pub delay_secs: u64,
    #[serde(default)]
    pub explorer_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub checkpoint_path: String,
    pub report_path: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: "checkpoint.txt".into(),
            report_path: "report.csv".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

pub fn load(path: &Path) -> anyhow::Result<MultisendConfig> {
    let config = Config::builder()
        .add_source(File::from(path).required(true))
        .add_source(
            config::Environment::with_prefix("MULTISEND")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("rpc.endpoints")
                .with_list_parse_key("account.private_keys"),
        )
        .build()?;

    let config = config.try_deserialize::<MultisendConfig>()?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &MultisendConfig) -> anyhow::Result<()> {
    if config.rpc.endpoints.is_empty() {
        anyhow::bail!("no RPC endpoints configured");
    }
    if config.account.private_keys.is_empty() {
        anyhow::bail!("no signing accounts configured");
    }
    if !(1..=100).contains(&config.engine.batch_size) {
        anyhow::bail!(
            "batch_size must be between 1 and 100, got {}",
            config.engine.batch_size
        );
    }
    if !(1..=10).contains(&config.engine.max_attempts) {
        anyhow::bail!(
            "max_attempts must be between 1 and 10, got {}",
            config.engine.max_attempts
        );
    }
    if config.delay.mode == DelayMode::Random && config.delay.min_seconds >= config.delay.max_seconds
    {
        anyhow::bail!("random delay requires min_seconds < max_seconds");
    }
    Ok(())
}
