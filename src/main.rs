use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use medtools_server::cache::{TtlCache, DEFAULT_CACHE_TTL_SEC};
use medtools_server::config::{
    AppConfig, CliConfig, FileConfig, DEFAULT_BIND_ADDRESS, DEFAULT_CACHE_SWEEP_INTERVAL_SEC,
    DEFAULT_MCP_PATH, DEFAULT_METRICS_PORT, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT_SEC,
    DEFAULT_SESSION_IDLE_TIMEOUT_SEC,
};
use medtools_server::mcp::{tools, Dispatcher, ToolRegistry};
use medtools_server::server::{self, run_server, RequestsLoggingLevel, ServerConfig};
use medtools_server::session::{CloseReason, SessionManager, SessionMode};
use medtools_server::usage::UsageLedger;

#[derive(Parser, Debug)]
#[clap(version = env!("APP_VERSION"))]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// The address to bind both listeners to.
    #[clap(long, default_value = DEFAULT_BIND_ADDRESS)]
    pub bind_address: String,

    /// The port for the metrics server (Prometheus scraping). 0 disables it.
    #[clap(long, default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Path of the MCP endpoint.
    #[clap(long, default_value = DEFAULT_MCP_PATH)]
    pub mcp_path: String,

    /// How long a tool result stays cached, in seconds.
    #[clap(long, env = "CACHE_TTL", default_value_t = DEFAULT_CACHE_TTL_SEC)]
    pub cache_ttl_sec: u64,

    /// How sessions map onto event channels.
    #[clap(long, value_enum, default_value_t = SessionMode::Shared)]
    pub session_mode: SessionMode,

    /// Close sessions idle for this many seconds. 0 disables it.
    #[clap(long, default_value_t = DEFAULT_SESSION_IDLE_TIMEOUT_SEC)]
    pub session_idle_timeout_sec: u64,

    /// Fail a request that has not completed after this many seconds. 0 disables it.
    #[clap(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SEC)]
    pub request_timeout_sec: u64,

    /// Interval in seconds between expired cache entry sweeps. 0 disables it.
    #[clap(long, default_value_t = DEFAULT_CACHE_SWEEP_INTERVAL_SEC)]
    pub cache_sweep_interval_sec: u64,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            port: self.port,
            bind_address: self.bind_address.clone(),
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            mcp_path: self.mcp_path.clone(),
            session_mode: self.session_mode,
            session_idle_timeout_sec: self.session_idle_timeout_sec,
            request_timeout_sec: self.request_timeout_sec,
            cache_ttl_sec: self.cache_ttl_sec,
            cache_sweep_interval_sec: self.cache_sweep_interval_sec,
        }
    }
}

fn spawn_cache_sweep(cache: Arc<TtlCache>, interval: Duration) {
    info!("Cache sweep enabled every {}s", interval.as_secs());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        // Skip the first immediate tick, wait for the first interval
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = cache.purge_expired();
            server::metrics::set_cache_entries(cache.len());
            if removed > 0 {
                info!("Swept {} expired cache entries", removed);
            }
        }
    });
}

fn spawn_session_reaper(session_manager: Arc<SessionManager>, idle_timeout: Duration) {
    info!("Idle session reaper enabled, timeout {}s", idle_timeout.as_secs());
    // Check often enough that a session never outlives its timeout by much
    let interval = (idle_timeout / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let closed = session_manager.reap_idle();
            if closed > 0 {
                info!("Closed {} idle sessions", closed);
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let app_config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    server::metrics::init_metrics();

    let mut registry = ToolRegistry::new();
    tools::register_all_tools(&mut registry, &app_config.upstream)?;
    info!("Registered {} tools", registry.tool_count());

    let cache = Arc::new(TtlCache::with_ttl_secs(app_config.cache_ttl_sec));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(registry),
        cache.clone(),
        Arc::new(UsageLedger::new()),
    ));
    let session_manager = Arc::new(SessionManager::new(
        app_config.session_mode,
        dispatcher,
        app_config.session_settings(),
    ));

    if let Some(interval) = app_config.cache_sweep_interval() {
        spawn_cache_sweep(cache, interval);
    }
    if let Some(idle_timeout) = session_manager.settings().idle_timeout {
        spawn_session_reaper(session_manager.clone(), idle_timeout);
    }

    let server_config = ServerConfig::from(&app_config);
    info!(
        "Ready to serve at port {} (cache TTL {}s)",
        server_config.port, app_config.cache_ttl_sec
    );

    tokio::select! {
        result = run_server(server_config, session_manager.clone()) => {
            if let Err(e) = &result {
                error!("Server stopped: {:#}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            let closed = session_manager.close_all(CloseReason::Shutdown);
            info!("Closed {} sessions", closed);
            Ok(())
        }
    }
}
