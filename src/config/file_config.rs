use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub mcp_path: Option<String>,

    // Sessions
    pub session_mode: Option<String>,
    pub session_idle_timeout_sec: Option<u64>,
    pub request_timeout_sec: Option<u64>,

    // Cache
    pub cache_ttl_sec: Option<u64>,
    pub cache_sweep_interval_sec: Option<u64>,

    // Feature configs
    pub upstream: Option<UpstreamConfig>,
}

/// `[upstream]` section: where the tool adapters fetch their data.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct UpstreamConfig {
    pub pubmed_base_url: Option<String>,
    pub openfda_base_url: Option<String>,
    pub clinical_trials_base_url: Option<String>,
    pub crossref_base_url: Option<String>,
    pub ncbi_api_key: Option<String>,
    pub timeout_sec: Option<u64>,
    pub user_agent: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
