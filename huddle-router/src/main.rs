//! Huddle router -- direct-message routing server.
//!
//! An axum WebSocket server that authenticates connections, persists
//! messages before acknowledging them, and fans pushes out to every
//! active connection of the addressed user.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9400
//! cargo run --bin huddle-router
//!
//! # Run on custom address
//! cargo run --bin huddle-router -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! HUDDLE_ROUTER_ADDR=127.0.0.1:8080 cargo run --bin huddle-router
//! ```

use std::sync::Arc;

use clap::Parser;
use huddle_router::auth::OpaqueVerifier;
use huddle_router::config::{RouterCliArgs, RouterConfig};
use huddle_router::router::{self, RouterState};
use huddle_router::store::MessageStore;

#[tokio::main]
async fn main() {
    let cli = RouterCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RouterConfig::load(&cli) {
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

    tracing::info!(addr = %config.bind_addr, "starting huddle router");

    let store = MessageStore::with_max_conversation_len(config.max_conversation_len);
    let state = Arc::new(RouterState::with_config(Box::new(OpaqueVerifier), store));

    match router::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "router listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "router task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start router");
            std::process::exit(1);
        }
    }
}
