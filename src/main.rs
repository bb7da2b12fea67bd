//! # hubwire
//!
//! Hub server binary: loads settings, installs logging and metrics,
//! registers the demo chat hub and serves until ctrl-c.

#![deny(unsafe_code)]

mod chat;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hubwire_server::config::ServerConfig;
use hubwire_server::rpc::interceptors::InvocationLogger;
use hubwire_server::rpc::registry::MethodRegistry;
use hubwire_server::server::HubServer;
use hubwire_settings::HubSettings;
use hubwire_settings::loader::parse_log_format;

/// Hub server.
#[derive(Parser, Debug)]
#[command(name = "hubwire", about = "Real-time RPC hub over WebSocket")]
struct Cli {
    /// Settings file (defaults to `~/.hubwire/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter directive, e.g. `debug` or `hubwire_server=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format: `compact` or `json`.
    #[arg(long)]
    log_format: Option<String>,
}

impl Cli {
    /// Apply CLI overrides on top of loaded settings.
    fn apply(&self, settings: &mut HubSettings) -> Result<()> {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            settings.logging.format = parse_log_format(format)
                .with_context(|| format!("Unknown log format '{format}'"))?;
        }
        Ok(())
    }
}

/// Map loaded settings onto the server crate's config.
fn server_config(settings: &HubSettings) -> ServerConfig {
    let server = &settings.server;
    ServerConfig {
        host: server.host.clone(),
        port: server.port,
        max_connections: server.max_connections,
        heartbeat_interval_secs: server.heartbeat_interval_secs,
        heartbeat_timeout_secs: server.heartbeat_timeout_secs,
        max_message_size: server.max_message_size,
        send_queue_capacity: server.send_queue_capacity,
        handler_timeout_secs: server.handler_timeout_secs,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = match &args.settings {
        Some(path) => hubwire_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => hubwire_settings::load_settings().context("Failed to load settings")?,
    };
    args.apply(&mut settings)?;
    logging::init_subscriber(&settings.logging);

    let logger = Arc::new(InvocationLogger::new());
    let mut registry = MethodRegistry::new();
    chat::register_chat_hub(&mut registry, &settings.rate_limit, Arc::clone(&logger))
        .context("Failed to register chat hub")?;
    let method_count = registry.len();

    let mut server = HubServer::new(server_config(&settings), registry);
    match hubwire_server::metrics::install_recorder() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "metrics recorder not installed, /metrics disabled"),
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("hubwire listening on ws://{addr}/ws ({method_count} methods registered)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(vec![handle], None)
        .await;

    tracing::info!(
        completed = logger.completed(),
        failed = logger.failed(),
        "Shutdown complete"
    );
    Ok(())
}
