//! msgrelay server: WebSocket message relay with persisted history.
//!
//! # Usage
//!
//! ```bash
//! # In-memory store on the default address 0.0.0.0:8080
//! cargo run --bin msgrelay-server -- --store-url memory:
//!
//! # SQLite store on a custom address
//! cargo run --bin msgrelay-server -- --bind 127.0.0.1:9000 --store-url sqlite://data/messages.db
//!
//! # Or via environment variables
//! MSGRELAY_STORE_URL=sqlite://data/messages.db cargo run --bin msgrelay-server
//! ```

use std::sync::Arc;

use clap::Parser;
use msgrelay_server::config::{RelayCliArgs, RelayConfig};
use msgrelay_server::relay::{self, RelayState};
use msgrelay_server::store::AnyStore;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let store = match AnyStore::open(&config.store_url) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open message store");
            std::process::exit(1);
        }
    };
    tracing::info!(
        backend = store.kind(),
        timeout_ms = config.store_timeout.as_millis(),
        "message store ready"
    );

    let state = Arc::new(RelayState::new(store).with_store_timeout(config.store_timeout));

    tracing::info!(addr = %config.bind_addr, "starting msgrelay server");

    match relay::start_server_with_shutdown(&config.bind_addr, state, shutdown_signal()).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
            tracing::info!("relay server stopped");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}

/// Completes on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received, no longer accepting connections");
}
