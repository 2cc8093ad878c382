use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::store::Collection;

use super::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub healthy: bool,
    pub stop_count: i64,
    pub operator_count: i64,
    pub service_count: i64,
    pub journey_count: i64,
    pub realtime_journey_count: i64,
    /// Events published to the realtime queue but not yet processed.
    pub queue_depth: usize,
}

/// Health check: collection sizes and realtime queue depth.
#[utoipa::path(
    get,
    path = "/core/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let count = |collection| {
        let store = state.store.clone();
        async move { store.count(collection).await.unwrap_or(-1) }
    };

    Json(HealthResponse {
        healthy: true,
        stop_count: count(Collection::Stops).await,
        operator_count: count(Collection::Operators).await,
        service_count: count(Collection::Services).await,
        journey_count: count(Collection::Journeys).await,
        realtime_journey_count: state.store.realtime_journey_count().await.unwrap_or(-1),
        queue_depth: state.queue.depth(),
    })
}
