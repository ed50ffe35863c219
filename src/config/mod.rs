mod file_config;

pub use file_config::{FileConfig, UpstreamConfig};

use crate::cache::DEFAULT_CACHE_TTL_SEC;
use crate::server::RequestsLoggingLevel;
use crate::session::{SessionMode, SessionSettings};
use anyhow::{anyhow, bail, Result};
use clap::ValueEnum;
use std::net::IpAddr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_METRICS_PORT: u16 = 9091;
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_MCP_PATH: &str = "/mcp";
pub const DEFAULT_SESSION_IDLE_TIMEOUT_SEC: u64 = 1800;
pub const DEFAULT_REQUEST_TIMEOUT_SEC: u64 = 120;
pub const DEFAULT_CACHE_SWEEP_INTERVAL_SEC: u64 = 300;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub port: u16,
    pub bind_address: String,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub mcp_path: String,
    pub session_mode: SessionMode,
    pub session_idle_timeout_sec: u64,
    pub request_timeout_sec: u64,
    pub cache_ttl_sec: u64,
    pub cache_sweep_interval_sec: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
            logging_level: RequestsLoggingLevel::default(),
            mcp_path: DEFAULT_MCP_PATH.to_string(),
            session_mode: SessionMode::default(),
            session_idle_timeout_sec: DEFAULT_SESSION_IDLE_TIMEOUT_SEC,
            request_timeout_sec: DEFAULT_REQUEST_TIMEOUT_SEC,
            cache_ttl_sec: DEFAULT_CACHE_TTL_SEC,
            cache_sweep_interval_sec: DEFAULT_CACHE_SWEEP_INTERVAL_SEC,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub port: u16,
    pub bind_address: IpAddr,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub mcp_path: String,

    // Sessions
    pub session_mode: SessionMode,
    pub session_idle_timeout_sec: u64,
    pub request_timeout_sec: u64,

    // Cache
    pub cache_ttl_sec: u64,
    pub cache_sweep_interval_sec: u64,

    // Feature configs (with defaults)
    pub upstream: UpstreamSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let bind_address_str = file
            .bind_address
            .unwrap_or_else(|| cli.bind_address.clone());
        let bind_address: IpAddr = bind_address_str
            .parse()
            .map_err(|_| anyhow!("Invalid bind address: {}", bind_address_str))?;

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let mcp_path = file.mcp_path.unwrap_or_else(|| cli.mcp_path.clone());
        if !mcp_path.starts_with('/') {
            bail!("mcp_path must start with '/': {}", mcp_path);
        }

        let session_mode = match file.session_mode {
            Some(s) => parse_session_mode(&s)
                .ok_or_else(|| anyhow!("Unknown session_mode in config file: {}", s))?,
            None => cli.session_mode,
        };
        let session_idle_timeout_sec = file
            .session_idle_timeout_sec
            .unwrap_or(cli.session_idle_timeout_sec);
        let request_timeout_sec = file.request_timeout_sec.unwrap_or(cli.request_timeout_sec);

        let cache_ttl_sec = file.cache_ttl_sec.unwrap_or(cli.cache_ttl_sec);
        if cache_ttl_sec == 0 {
            bail!("cache TTL must be greater than zero");
        }
        let cache_sweep_interval_sec = file
            .cache_sweep_interval_sec
            .unwrap_or(cli.cache_sweep_interval_sec);

        // Upstream settings - merge file config with defaults
        let up_file = file.upstream.unwrap_or_default();
        let defaults = UpstreamSettings::default();
        let upstream = UpstreamSettings {
            pubmed_base_url: up_file.pubmed_base_url.unwrap_or(defaults.pubmed_base_url),
            openfda_base_url: up_file.openfda_base_url.unwrap_or(defaults.openfda_base_url),
            clinical_trials_base_url: up_file
                .clinical_trials_base_url
                .unwrap_or(defaults.clinical_trials_base_url),
            crossref_base_url: up_file
                .crossref_base_url
                .unwrap_or(defaults.crossref_base_url),
            ncbi_api_key: up_file.ncbi_api_key.filter(|key| !key.is_empty()),
            timeout_secs: up_file.timeout_sec.unwrap_or(defaults.timeout_secs),
            user_agent: up_file.user_agent.unwrap_or(defaults.user_agent),
        };
        if upstream.timeout_secs == 0 {
            bail!("upstream timeout must be greater than zero");
        }

        Ok(Self {
            port,
            bind_address,
            metrics_port,
            logging_level,
            mcp_path,
            session_mode,
            session_idle_timeout_sec,
            request_timeout_sec,
            cache_ttl_sec,
            cache_sweep_interval_sec,
            upstream,
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            mcp_path: self.mcp_path.clone(),
            request_timeout: non_zero_secs(self.request_timeout_sec),
            idle_timeout: non_zero_secs(self.session_idle_timeout_sec),
        }
    }

    pub fn cache_sweep_interval(&self) -> Option<Duration> {
        non_zero_secs(self.cache_sweep_interval_sec)
    }

    /// `None` when the metrics listener is disabled (port 0).
    pub fn metrics_port(&self) -> Option<u16> {
        (self.metrics_port != 0).then_some(self.metrics_port)
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub pubmed_base_url: String,
    pub openfda_base_url: String,
    pub clinical_trials_base_url: String,
    pub crossref_base_url: String,
    pub ncbi_api_key: Option<String>,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            pubmed_base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
            openfda_base_url: "https://api.fda.gov".to_string(),
            clinical_trials_base_url: "https://clinicaltrials.gov/api/v2".to_string(),
            crossref_base_url: "https://api.crossref.org".to_string(),
            ncbi_api_key: None,
            timeout_secs: 30,
            user_agent: format!("medtools-server/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

fn parse_session_mode(s: &str) -> Option<SessionMode> {
    SessionMode::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("body"),
            Some(RequestsLoggingLevel::Body)
        ));
        // Case insensitive
        assert!(matches!(
            parse_logging_level("PATH"),
            Some(RequestsLoggingLevel::Path)
        ));
        // Invalid
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_parse_session_mode() {
        assert_eq!(parse_session_mode("stateless"), Some(SessionMode::Stateless));
        assert_eq!(parse_session_mode("Addressed"), Some(SessionMode::Addressed));
        assert_eq!(parse_session_mode("shared"), Some(SessionMode::Shared));
        assert_eq!(parse_session_mode("sticky"), None);
    }

    #[test]
    fn test_resolve_defaults() {
        let config = AppConfig::resolve(&CliConfig::default(), None).unwrap();

        assert_eq!(config.port, 8000);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.bind_address.to_string(), "127.0.0.1");
        assert_eq!(config.mcp_path, "/mcp");
        assert_eq!(config.session_mode, SessionMode::Shared);
        assert_eq!(config.cache_ttl_sec, 86_400);
        assert_eq!(
            config.session_settings().request_timeout,
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            config.session_settings().idle_timeout,
            Some(Duration::from_secs(1800))
        );
        assert_eq!(
            config.cache_sweep_interval(),
            Some(Duration::from_secs(300))
        );
        assert_eq!(config.upstream.openfda_base_url, "https://api.fda.gov");
    }

    #[test]
    fn test_resolve_cli_only() {
        let cli = CliConfig {
            port: 3001,
            bind_address: "0.0.0.0".to_string(),
            metrics_port: 0,
            logging_level: RequestsLoggingLevel::Headers,
            mcp_path: "/rpc".to_string(),
            session_mode: SessionMode::Stateless,
            session_idle_timeout_sec: 0,
            request_timeout_sec: 15,
            cache_ttl_sec: 60,
            cache_sweep_interval_sec: 0,
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.port, 3001);
        assert_eq!(config.bind_address.to_string(), "0.0.0.0");
        assert_eq!(config.metrics_port(), None);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        assert_eq!(config.session_mode, SessionMode::Stateless);
        assert_eq!(config.cache_ttl_sec, 60);
        assert_eq!(config.cache_sweep_interval(), None);
        assert_eq!(config.session_settings().idle_timeout, None);
        assert_eq!(config.session_settings().mcp_path, "/rpc");
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let cli = CliConfig {
            port: 3001,
            cache_ttl_sec: 3600,
            logging_level: RequestsLoggingLevel::Path,
            ..Default::default()
        };

        let file_config = FileConfig {
            port: Some(4000),
            logging_level: Some("body".to_string()),
            session_mode: Some("addressed".to_string()),
            upstream: Some(UpstreamConfig {
                crossref_base_url: Some("http://localhost:7000".to_string()),
                ncbi_api_key: Some("k".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        // TOML values should override CLI
        assert_eq!(config.port, 4000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Body);
        assert_eq!(config.session_mode, SessionMode::Addressed);
        assert_eq!(config.upstream.crossref_base_url, "http://localhost:7000");
        assert_eq!(config.upstream.ncbi_api_key.as_deref(), Some("k"));
        // CLI value used when TOML doesn't specify
        assert_eq!(config.cache_ttl_sec, 3600);
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(
            config.upstream.pubmed_base_url,
            "https://eutils.ncbi.nlm.nih.gov/entrez/eutils"
        );
    }

    #[test]
    fn test_resolve_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cache_ttl_sec = 5\nrequest_timeout_sec = 0").unwrap();

        let file_config = FileConfig::load(file.path()).unwrap();
        let config = AppConfig::resolve(&CliConfig::default(), Some(file_config)).unwrap();

        assert_eq!(config.cache_ttl_sec, 5);
        assert_eq!(config.session_settings().request_timeout, None);
    }

    #[test]
    fn test_resolve_zero_ttl_error() {
        let cli = CliConfig {
            cache_ttl_sec: 0,
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cache TTL must be greater than zero"));
    }

    #[test]
    fn test_resolve_bad_mcp_path_error() {
        let cli = CliConfig {
            mcp_path: "mcp".to_string(),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_resolve_bad_bind_address_error() {
        let cli = CliConfig {
            bind_address: "localhost:80".to_string(),
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("Invalid bind address"));
    }

    #[test]
    fn test_resolve_unknown_session_mode_error() {
        let file_config = FileConfig {
            session_mode: Some("sticky".to_string()),
            ..Default::default()
        };
        let err = AppConfig::resolve(&CliConfig::default(), Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("Unknown session_mode"));
    }

    #[test]
    fn test_resolve_blank_api_key_is_none() {
        let file_config = FileConfig {
            upstream: Some(UpstreamConfig {
                ncbi_api_key: Some(String::new()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = AppConfig::resolve(&CliConfig::default(), Some(file_config)).unwrap();
        assert!(config.upstream.ncbi_api_key.is_none());
    }
}
