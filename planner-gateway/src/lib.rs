//! Planner Gateway - chat backend for the study planner.
//!
//! This crate provides:
//! - Per-session conversation history in Redis, bounded to the last 30 entries
//! - Reply composition with optional DuckDuckGo web search
//! - Gemini generation
//! - The HTTP surface (`/`, `/health`, `/api/chat`)
//!
//! ## Architecture
//!
//! ```text
//! POST /api/chat → SessionStore::load → ResponseComposer::compose → SessionStore::save
//!                                          ↓            ↓
//!                                     WebSearch     Provider
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod composer;
pub mod history;
pub mod provider;
pub mod routes;
pub mod search;
pub mod session;

pub use composer::{ComposedReply, ResponseComposer};
pub use history::{HistoryEntry, Role, HISTORY_LIMIT};
pub use provider::{
    create_provider, ChatRequest, ChatResponse, GeminiProvider, Message, Provider, ProviderError,
};
pub use routes::{build_routes, AppState};
pub use search::{DisabledSearch, DuckDuckGoSearch, SearchResult, WebSearch};
pub use session::{KeyValueBackend, MemoryBackend, RedisBackend, SessionStore, StoreError};

use anyhow::Context;
use axum::Router;
use planner_common::config::{Config, SearchConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Build the router with middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    build_routes(state).layer(cors)
}

/// Construct the search collaborator from configuration.
pub fn create_search(config: &SearchConfig) -> Arc<dyn WebSearch> {
    if config.enabled {
        Arc::new(DuckDuckGoSearch::new().with_base_url(config.base_url.clone()))
    } else {
        tracing::info!("Web search disabled by configuration");
        Arc::new(DisabledSearch)
    }
}

/// Construct all dependencies once at startup.
pub async fn build_state(config: &Config) -> AppState {
    let store = SessionStore::connect(&config.redis).await;
    let composer = ResponseComposer::new(
        create_provider(&config.gemini),
        create_search(&config.search),
        config.gemini.model.clone(),
    )
    .with_max_results(config.search.max_results)
    .with_sampling(config.gemini.temperature, config.gemini.max_output_tokens);

    AppState::new(store, composer)
}

/// Start the gateway server.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .with_context(|| format!("Invalid bind address {}", config.server.host))?,
        config.server.port,
    ));

    let state = build_state(config).await;
    tracing::info!(
        history = state.store.is_enabled(),
        generation = state.composer.is_configured(),
        "Dependencies ready"
    );

    let router = build_router(state);

    tracing::info!("Starting Planner Gateway on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
