//! HTTP surface for the conditions engine.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use engine::ConditionsService;
use serde::Serialize;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod handlers;

pub use error::ApiError;

/// Application state shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConditionsService>,
}

impl AppState {
    pub fn new(service: Arc<ConditionsService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "powder-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub fn build_router(state: AppState) -> Router {
    let conditions = Router::new()
        .route("/conditions/batch/all", get(handlers::batch_all))
        .route(
            "/conditions/batch/snowfall-history",
            get(handlers::batch_snowfall_history),
        )
        .route("/conditions/:id/powder-score", get(handlers::powder_score))
        .route("/conditions/:id/parking", get(handlers::parking))
        .route("/conditions/:id/powder-day-plan", get(handlers::powder_day_plan))
        .route("/conditions/:id/arrival-time", get(handlers::arrival_time));

    Router::new()
        .merge(conditions)
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState, bind_addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, build_router(state)).await
}
