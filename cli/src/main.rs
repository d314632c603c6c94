//! `lspkit-demo`: a small language server over stdio.
//!
//! ```text
//! main() -> load_config() -> demo::server() -> Server::serve(stdin, stdout)
//!                                                  |
//!                                                  v
//!                                 SessionEnd::exit_code() -> process exit
//! ```
//!
//! Set `debug_tap = true` in the config to record traffic; a summary is
//! logged when the session ends.

mod demo;
mod documents;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use lspkit_server::ServerConfig;
use lspkit_tap::{Tap, TracingSink, TrafficSink, TrafficStats, TrafficStore};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::documents::Documents;

const CONFIG_ENV: &str = "LSPKIT_CONFIG";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    // stdout carries the protocol.
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load_config() -> Result<ServerConfig> {
    if let Some(path) = env::var_os(CONFIG_ENV).map(PathBuf::from) {
        let config = ServerConfig::load(&path)
            .with_context(|| format!("failed to load {CONFIG_ENV}={}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded config");
        return Ok(config);
    }

    let Some(path) = dirs::config_dir().map(|dir| dir.join("lspkit").join("config.toml")) else {
        return Ok(ServerConfig::default());
    };
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(ServerConfig::default());
    }
    let config = ServerConfig::load(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(config)
}

fn log_traffic(stats: &TrafficStats) {
    tracing::info!(
        requests = stats.requests,
        responses = stats.responses,
        notifications = stats.notifications,
        invalid = stats.invalid,
        average_latency = ?stats.average_latency,
        "Traffic summary"
    );
    for (method, method_stats) in &stats.methods {
        tracing::info!(
            method = %method,
            requests = method_stats.requests,
            responses = method_stats.responses,
            average_latency = ?method_stats.average_latency,
            "Method traffic"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = load_config()?;
    let debug_tap = config.debug_tap();
    let capacity = config.traffic_capacity();
    let server = demo::server(config, Documents::default());

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let end = if debug_tap {
        let store = TrafficStore::new(capacity);
        let sink: Arc<dyn TrafficSink> = Arc::new((store.clone(), TracingSink));
        let end = server
            .serve(Tap::new(stdin, Arc::clone(&sink)), Tap::new(stdout, sink))
            .await?;
        log_traffic(&store.stats());
        end
    } else {
        server.serve(stdin, stdout).await?
    };

    // The stdin reader thread may still be blocked; exit without waiting on it.
    std::process::exit(end.exit_code());
}
