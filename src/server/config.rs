use std::net::{IpAddr, Ipv4Addr};

use super::RequestsLoggingLevel;
use crate::config::{AppConfig, DEFAULT_MCP_PATH, DEFAULT_PORT};

#[derive(Clone)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub bind_address: IpAddr,
    pub port: u16,
    /// `None` keeps the metrics listener down.
    pub metrics_port: Option<u16>,
    pub mcp_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            metrics_port: None,
            mcp_path: DEFAULT_MCP_PATH.to_string(),
        }
    }
}

impl From<&AppConfig> for ServerConfig {
    fn from(config: &AppConfig) -> Self {
        ServerConfig {
            requests_logging_level: config.logging_level.clone(),
            bind_address: config.bind_address,
            port: config.port,
            metrics_port: config.metrics_port(),
            mcp_path: config.mcp_path.clone(),
        }
    }
}
