//! Process configuration: command-line flags, each backed by an environment
//! variable

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use proxyflow_gateway::{GatewayConfig, HandlerConfig};
use std::time::Duration;
use url::Url;

/// ProxyFlow gateway - authenticating HTTP CONNECT proxy
#[derive(Parser, Debug, Clone)]
#[command(name = "proxyflow-gateway")]
#[command(about = "Run the ProxyFlow CONNECT gateway", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
pub struct Config {
    /// Address to accept client connections on
    #[arg(long, env = "GATEWAY_LISTEN_ADDR", default_value = "0.0.0.0")]
    pub listen_addr: String,

    /// Port to accept client connections on
    #[arg(long, env = "GATEWAY_LISTEN_PORT", default_value_t = 8080)]
    pub listen_port: u16,

    /// Seconds to wait for in-flight tunnels on shutdown
    #[arg(long, env = "GATEWAY_SHUTDOWN_TIMEOUT", default_value_t = 30)]
    pub shutdown_timeout: u64,

    /// Seconds a client has to send its CONNECT request
    #[arg(long, env = "GATEWAY_HANDSHAKE_TIMEOUT", default_value_t = 30)]
    pub handshake_timeout: u64,

    /// Seconds allowed for dialing the upstream proxy
    #[arg(long, env = "GATEWAY_CONNECT_TIMEOUT", default_value_t = 10)]
    pub connect_timeout: u64,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "GATEWAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Account database URL; built from the POSTGRES_* settings when unset
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "POSTGRES_HOST", default_value = "postgres")]
    pub postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "POSTGRES_USER", default_value = "proxyuser")]
    pub postgres_user: String,

    #[arg(
        long,
        env = "POSTGRES_PASSWORD",
        default_value = "proxypass123",
        hide_env_values = true,
        hide_default_value = true
    )]
    pub postgres_password: String,

    #[arg(long, env = "POSTGRES_DB", default_value = "proxyflow")]
    pub postgres_db: String,

    /// Analytics database URL; built from the ANALYTICS_* settings when unset
    #[arg(long, env = "ANALYTICS_DATABASE_URL", hide_env_values = true)]
    pub analytics_database_url: Option<String>,

    #[arg(long, env = "ANALYTICS_HOST", default_value = "analytics")]
    pub analytics_host: String,

    #[arg(long, env = "ANALYTICS_PORT", default_value_t = 5432)]
    pub analytics_port: u16,

    #[arg(long, env = "ANALYTICS_USER", default_value = "proxyuser")]
    pub analytics_user: String,

    #[arg(
        long,
        env = "ANALYTICS_PASSWORD",
        default_value = "proxypass123",
        hide_env_values = true,
        hide_default_value = true
    )]
    pub analytics_password: String,

    #[arg(long, env = "ANALYTICS_DB", default_value = "proxyflow_analytics")]
    pub analytics_db: String,

    /// Seconds between usage flushes
    #[arg(long, env = "TRAFFIC_FLUSH_INTERVAL", default_value_t = 60)]
    pub flush_interval: u64,

    /// Apply pending schema migrations on startup
    #[arg(long, env = "GATEWAY_RUN_MIGRATIONS")]
    pub run_migrations: bool,
}

impl Config {
    pub fn database_url(&self) -> Result<String> {
        match &self.database_url {
            Some(url) => Ok(url.clone()),
            None => postgres_url(
                &self.postgres_user,
                &self.postgres_password,
                &self.postgres_host,
                self.postgres_port,
                &self.postgres_db,
            ),
        }
    }

    pub fn analytics_database_url(&self) -> Result<String> {
        match &self.analytics_database_url {
            Some(url) => Ok(url.clone()),
            None => postgres_url(
                &self.analytics_user,
                &self.analytics_password,
                &self.analytics_host,
                self.analytics_port,
                &self.analytics_db,
            ),
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            listen_addr: self.listen_addr.clone(),
            port: self.listen_port,
        }
    }

    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            handshake_timeout: Duration::from_secs(self.handshake_timeout),
            connect_timeout: Duration::from_secs(self.connect_timeout),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval)
    }
}

/// Build a Postgres URL, percent-encoding the credentials and database name
fn postgres_url(user: &str, password: &str, host: &str, port: u16, db: &str) -> Result<String> {
    let mut url = Url::parse(&format!("postgres://{}:{}", host, port))
        .with_context(|| format!("Invalid database host: {}", host))?;

    url.set_username(user)
        .map_err(|_| anyhow!("Cannot set database user on {}", host))?;
    url.set_password(Some(password))
        .map_err(|_| anyhow!("Cannot set database password on {}", host))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("Cannot set database name on {}", host))?
        .push(db);

    Ok(url.into())
}
