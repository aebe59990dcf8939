use axum::{Router, extract::DefaultBodyLimit};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod models;
pub mod rate_limit;
pub mod render;
pub mod repository;
pub mod routes;
pub mod services;
pub mod state;
pub mod uploads;

pub use config::{AuthConfig, GoogleConfig, ServerConfig};
pub use error::{ApiError, ApiResult};
pub use state::AppState;

pub fn create_router(config: ServerConfig) -> anyhow::Result<Router> {
    let state = AppState::new(&config)?;

    match state.renderer.ffmpeg().version() {
        Ok(version) => info!("Rendering with {version}"),
        Err(e) => warn!("ffmpeg is not usable, renders will fail: {e}"),
    }
    if state.google.is_none() {
        info!("Google sign-in is not configured");
    }
    if state.reel_limiter.limit() == 0 {
        info!("Reel upload rate limiting is disabled");
    }

    Ok(router_with_state(state, config.max_upload_bytes))
}

pub fn router_with_state(state: AppState, max_upload_bytes: usize) -> Router {
    routes::router()
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
