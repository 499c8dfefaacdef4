use crate::cli::ServeOpts;
use crate::config::Config;
use crate::gateway::routes;
use crate::pipeline::ConversationIndex;

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shared state for the REST server.
#[derive(Clone)]
pub struct GatewayState {
    pub index: ConversationIndex,
    pub config: Arc<Config>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub start_time: std::time::Instant,
    pub version: String,
}

impl GatewayState {
    pub fn new(index: ConversationIndex, config: Config) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            index,
            config: Arc::new(config),
            shutdown_tx,
            start_time: std::time::Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The REST server.
pub struct GatewayServer {
    state: GatewayState,
    addr: SocketAddr,
}

impl GatewayServer {
    /// Open the index and resolve the listen address.
    pub async fn start(config: Config, opts: ServeOpts) -> Result<Self> {
        let port = opts.port.unwrap_or(config.server.port);
        let addr = resolve_bind_address(&config, opts.bind.as_deref(), port)?;

        let index = ConversationIndex::open(&config)?;
        let state = GatewayState::new(index, config);

        info!("REST server binding to {}", addr);
        Ok(Self { state, addr })
    }

    /// Run the server until a shutdown signal is received.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let state = self.state.clone();
        let app = build_router(state.clone());

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("cannot listen on {}", self.addr))?;

        print_startup_banner(&state, &self.addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(state.shutdown_tx.clone()))
            .await?;

        info!("REST server shut down gracefully");
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(());
    }
}

fn build_router(state: GatewayState) -> Router {
    routes::build_routes(state)
}

/// Wait for Ctrl+C, SIGTERM or an explicit shutdown request.
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let mut requested = shutdown_tx.subscribe();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
        _ = requested.recv() => {
            info!("Shutdown requested");
        }
    }
}

/// Resolve the listen address from configuration and CLI overrides.
fn resolve_bind_address(config: &Config, bind_override: Option<&str>, port: u16) -> Result<SocketAddr> {
    let host = bind_override.unwrap_or(&config.server.bind);
    let host = match host {
        "loopback" | "localhost" => "127.0.0.1",
        "lan" | "any" => "0.0.0.0",
        other => other,
    };
    let addr = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    addr.parse()
        .with_context(|| format!("invalid bind address {addr:?}"))
}

fn print_startup_banner(state: &GatewayState, addr: &SocketAddr) {
    let settings = state.index.settings();
    info!("-------------------------------------------");
    info!("  convoindex v{}", state.version);
    info!("  Listening on: http://{}", addr);
    info!("  Model: {}", state.index.provider().model_name());
    info!(
        "  Index: {} dims, {} distance",
        settings.target_width, settings.metric
    );
    info!("  Health: http://{}/api/health", addr);
    info!("-------------------------------------------");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_aliases_resolve() {
        let config = Config::default();
        let addr = resolve_bind_address(&config, Some("lan"), 8080).unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:8080");

        let addr = resolve_bind_address(&config, None, 18790).unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:18790");
    }

    #[test]
    fn ipv6_hosts_are_bracketed() {
        let config = Config::default();
        let addr = resolve_bind_address(&config, Some("::1"), 9000).unwrap();
        assert_eq!(addr.to_string(), "[::1]:9000");
    }

    #[test]
    fn garbage_bind_is_an_error() {
        let config = Config::default();
        assert!(resolve_bind_address(&config, Some("not a host"), 1).is_err());
    }
}
