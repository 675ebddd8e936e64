//! HTTP API.

mod error;
mod routes;

use axum::Router;
use coincache_refresh::{RefreshEngine, RefreshHandle};
use coincache_service::CoinService;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state.
pub struct AppState {
    pub service: Arc<CoinService>,
    pub engine: Arc<RefreshEngine>,
    /// Running refresh loop, if the server started one
    pub refresh: Option<RefreshHandle>,
    pub default_list_limit: usize,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    routes::router()
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
