//! HTTP surface of the reporef service

pub mod error;
pub mod files;
pub mod handlers;
pub mod pages;

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, routing::get, Router};
use reporef_core::{ProviderRegistry, Registry, ServerConfig};
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub providers: Arc<ProviderRegistry>,
    pub server: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(registry: Registry, providers: ProviderRegistry, server: ServerConfig) -> Self {
        Self {
            registry,
            providers: Arc::new(providers),
            server: Arc::new(server),
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::home))
        .route("/stats", get(handlers::stats))
        .route("/healthz", get(handlers::health))
        .fallback(handlers::reporef)
        .layer(from_fn_with_state(state.clone(), handlers::redirect_alias_hosts))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
