//! Conditions endpoints.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use engine::Product;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    #[serde(default)]
    pub ids: String,
}

/// `public, max-age=TTL, stale-while-revalidate=2×TTL`
pub fn cache_control(ttl: Duration) -> HeaderValue {
    let secs = ttl.as_secs();
    HeaderValue::from_str(&format!(
        "public, max-age={}, stale-while-revalidate={}",
        secs,
        secs * 2
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("no-cache"))
}

fn cached_json<T: Serialize>(state: &AppState, product: Product, body: T) -> Response {
    let ttl = state.service.ttl(product);
    ([(header::CACHE_CONTROL, cache_control(ttl))], Json(body)).into_response()
}

/// GET /conditions/:id/powder-score
pub async fn powder_score(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let payload = state.service.powder_score_or_unavailable(&id).await?;
    Ok(cached_json(&state, Product::PowderScore, payload))
}

/// GET /conditions/:id/parking
pub async fn parking(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let payload = state.service.parking(&id).await?;
    Ok(cached_json(&state, Product::Parking, payload))
}

/// GET /conditions/:id/powder-day-plan
pub async fn powder_day_plan(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let payload = state.service.powder_day_plan(&id).await?;
    Ok(cached_json(&state, Product::PowderDayPlan, payload))
}

/// GET /conditions/:id/arrival-time
pub async fn arrival_time(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let payload = state.service.arrival_time(&id).await?;
    Ok(cached_json(&state, Product::ArrivalTime, payload))
}

/// GET /conditions/batch/all?ids=a,b,c
pub async fn batch_all(State(state): State<AppState>, Query(q): Query<BatchQuery>) -> Result<Response, ApiError> {
    let payload = state.service.batch_powder_scores(&q.ids).await?;
    Ok(cached_json(&state, Product::PowderScore, payload))
}

/// GET /conditions/batch/snowfall-history?ids=a,b,c
pub async fn batch_snowfall_history(
    State(state): State<AppState>,
    Query(q): Query<BatchQuery>,
) -> Result<Response, ApiError> {
    let payload = state.service.batch_snowfall_history(&q.ids).await?;
    Ok(cached_json(&state, Product::SnowfallHistory, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_control_doubles_ttl_for_swr() {
        let v = cache_control(Duration::from_secs(600));
        assert_eq!(v.to_str().expect("ascii"), "public, max-age=600, stale-while-revalidate=1200");
    }
}
