/// MCP Server Entry Point
///
/// Parses flags and environment variables, builds the shared tool registry
/// and dispatcher, then runs the selected transport(s). Logs go to stderr so
/// stdout stays reserved for the stdio protocol stream.

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use clap::Parser;
use rancher_manager_mcp::core::config::{Config, TransportMode};
use rancher_manager_mcp::core::error::Result;
use rancher_manager_mcp::core::{http, stdio};
use rancher_manager_mcp::{CancelToken, Dispatcher, ToolRegistry, tools};

fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(&config)?;
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(config));

    // A stdin read parked on the blocking pool cannot be interrupted, so the
    // runtime is not allowed to wait for it.
    runtime.shutdown_background();
    result
}

async fn run(config: Config) -> Result<()> {
    info!(
        transport = ?config.transport,
        rancher = ?config.rancher,
        "starting {} v{}",
        config.server_name,
        config.server_version
    );

    // Registration completes before any transport reads the registry.
    let registry = Arc::new(ToolRegistry::new());
    tools::register_all(&registry);
    info!(tools = registry.len(), "tool registry initialized");

    let dispatcher = Arc::new(Dispatcher::new(registry, config.server_info()));

    let cancel = CancelToken::new();
    listen_for_shutdown(cancel.clone())?;

    match config.transport {
        TransportMode::Stdio => stdio::run_stdio(dispatcher, config.max_body_bytes, cancel).await,
        TransportMode::Http => http::run_http(dispatcher, &config).await,
        TransportMode::Both => {
            let stdio_dispatcher = Arc::clone(&dispatcher);
            let stdio_cancel = cancel.clone();
            let max_frame_bytes = config.max_body_bytes;
            let stdio_handle = tokio::spawn(async move {
                if let Err(e) = stdio::run_stdio(stdio_dispatcher, max_frame_bytes, stdio_cancel).await {
                    error!(error = %e, "stdio transport failed");
                }
            });

            let http_result = http::run_http(dispatcher, &config).await;

            // HTTP has exited; stop stdio at its next boundary.
            cancel.cancel();
            if let Err(e) = stdio_handle.await {
                error!(error = %e, "stdio task did not finish cleanly");
            }
            http_result
        }
    }
}

/// Cancel `cancel` on SIGINT or SIGTERM. The handlers are installed before
/// this returns.
#[cfg(unix)]
fn listen_for_shutdown(cancel: CancelToken) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("interrupt received, shutting down"),
            _ = terminate.recv() => info!("terminate received, shutting down"),
        }
        cancel.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn listen_for_shutdown(cancel: CancelToken) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            cancel.cancel();
        }
    });
    Ok(())
}

/// Configure tracing to stderr. `RUST_LOG` directives take precedence over
/// `--log-level`, which must still name a valid level.
fn init_logging(config: &Config) -> Result<()> {
    let fallback = config.log_filter()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or(fallback);

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
