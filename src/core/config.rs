/// Server Configuration
///
/// Every setting is a command-line flag with an environment-variable
/// fallback. Flags take precedence over the environment.

use clap::{Parser, ValueEnum};
use std::fmt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::core::error::{Error, Result};
use crate::core::protocol::ServerInfo;

/// Which transport loops to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportMode {
    /// JSON-RPC over stdin/stdout
    Stdio,
    /// JSON-RPC over HTTP POST
    Http,
    /// Both transports over one shared dispatcher
    Both,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "rancher-manager-mcp", version, about = "MCP server for Rancher Manager")]
pub struct Config {
    /// Transport type
    #[arg(long, env = "MCP_TRANSPORT_MODE", value_enum, default_value = "stdio")]
    pub transport: TransportMode,

    /// Bind address for the HTTP transport
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port for the HTTP transport
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Path of the JSON-RPC endpoint
    #[arg(long, env = "MCP_RPC_PATH", default_value = "/mcp")]
    pub rpc_path: String,

    /// Path of the liveness endpoint
    #[arg(long, env = "MCP_HEALTH_PATH", default_value = "/health")]
    pub health_path: String,

    /// Server name reported by `initialize`
    #[arg(long, env = "SERVER_NAME", default_value = "rancher-manager-mcp")]
    pub server_name: String,

    /// Server version reported by `initialize`
    #[arg(long, env = "SERVER_VERSION", default_value = "1.0.0")]
    pub server_version: String,

    /// HTTP worker threads (defaults to the CPU count, capped at 16)
    #[arg(long, env = "WORKER_THREADS")]
    pub workers: Option<usize>,

    /// Largest accepted request, in bytes (HTTP body or stdio frame)
    #[arg(long, env = "MCP_MAX_BODY_BYTES", default_value_t = 4 * 1024 * 1024)]
    pub max_body_bytes: usize,

    #[command(flatten)]
    pub rancher: CollaboratorConfig,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: self.server_name.clone(),
            version: self.server_version.clone(),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Log filter for `--log-level`. Unknown levels are a configuration error.
    pub fn log_filter(&self) -> Result<EnvFilter> {
        let level = self.log_level.trim();
        if level.parse::<LevelFilter>().is_err() {
            return Err(Error::config(format!(
                "invalid --log-level {level:?} (expected trace, debug, info, warn or error)"
            )));
        }
        EnvFilter::try_new(level)
            .map_err(|e| Error::config(format!("invalid --log-level {level:?}: {e}")))
    }

    /// Worker thread count for the HTTP server.
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| num_cpus::get().min(16))
            .max(1)
    }

    /// Reject settings the transports cannot serve.
    pub fn validate(&self) -> Result<()> {
        for (flag, path) in [("rpc-path", &self.rpc_path), ("health-path", &self.health_path)] {
            if !path.starts_with('/') {
                return Err(Error::config(format!("--{flag} must start with '/': {path:?}")));
            }
        }
        if self.rpc_path == self.health_path {
            return Err(Error::config("--rpc-path and --health-path must differ"));
        }
        if self.max_body_bytes == 0 {
            return Err(Error::config("--max-body-bytes must be positive"));
        }
        Ok(())
    }
}

/// Connection settings for the external resource-management API.
///
/// The dispatcher never looks at these; they only feed the health report and
/// the collaborators that register tools.
#[derive(Clone, Default, clap::Args)]
pub struct CollaboratorConfig {
    /// Rancher Manager API URL
    #[arg(long = "rancher-url", env = "RANCHER_URL")]
    pub url: Option<String>,

    /// Rancher API token
    #[arg(long = "rancher-token", env = "RANCHER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Skip TLS certificate verification (not recommended)
    #[arg(long, env = "RANCHER_INSECURE_SKIP_VERIFY")]
    pub insecure_skip_verify: bool,
}

impl CollaboratorConfig {
    pub fn is_configured(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.url) && present(&self.token)
    }
}

impl fmt::Debug for CollaboratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollaboratorConfig")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}
