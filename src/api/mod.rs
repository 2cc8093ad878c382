pub mod health;
pub mod stops;

use std::sync::Arc;

use axum::{routing::get, Router};
use chrono_tz::Tz;
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use crate::realtime::queue::EventQueue;
use crate::store::Store;
use crate::transforms::Transformer;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub timezone: Tz,
    pub active_cutoff: chrono::Duration,
    pub default_board_count: usize,
    pub transformer: Arc<Transformer>,
    pub queue: EventQueue,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(OpenApi)]
#[openapi(
    info(title = "Liveboard API", version = "0.3.0"),
    paths(
        stops::get_stop,
        stops::get_stop_departures,
        health::health_check,
    ),
    components(schemas(
        ErrorResponse,
        stops::StopResponse,
        stops::PlatformView,
        stops::EntranceView,
        health::HealthResponse,
        crate::timetable::TimetableRecord,
        crate::timetable::TimetableRecordType,
        crate::timetable::JourneyView,
        crate::timetable::ServiceView,
        crate::timetable::OperatorView,
    )),
    tags(
        (name = "stops", description = "Stops and departure boards"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/core/stops/{identifier}", get(stops::get_stop))
        .route(
            "/core/stops/{identifier}/departures",
            get(stops::get_stop_departures),
        )
        .route("/core/health", get(health::health_check))
        .with_state(state)
}
