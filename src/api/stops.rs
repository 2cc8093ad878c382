//! Stop lookup and the departure board endpoint.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::models::{Location, Stop};
use crate::store::StoreError;
use crate::timetable::{self, OperatorView, ServiceView, TimetableRecord};

use super::{AppState, ErrorResponse};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn not_found(message: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn internal_error(e: StoreError) -> ApiError {
    error!(error = %e, "Store error while serving request");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Internal error".to_string(),
        }),
    )
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlatformView {
    pub primary_identifier: String,
    pub primary_name: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EntranceView {
    pub primary_identifier: String,
    pub primary_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StopResponse {
    pub primary_identifier: String,
    pub primary_name: String,
    pub active: bool,
    #[schema(value_type = Object)]
    pub location: Option<Location>,
    pub platforms: Vec<PlatformView>,
    pub entrances: Vec<EntranceView>,
    pub services: Vec<ServiceView>,
}

fn stop_response(stop: Stop, services: Vec<ServiceView>) -> StopResponse {
    StopResponse {
        primary_identifier: stop.primary_identifier,
        primary_name: stop.primary_name,
        active: stop.active,
        location: stop.location,
        platforms: stop
            .platforms
            .into_iter()
            .map(|p| PlatformView {
                primary_identifier: p.primary_identifier,
                primary_name: p.primary_name,
            })
            .collect(),
        entrances: stop
            .entrances
            .into_iter()
            .map(|e| EntranceView {
                primary_identifier: e.primary_identifier,
                primary_name: e.primary_name,
            })
            .collect(),
        services,
    }
}

/// Get a stop with its services. Service name overrides are applied to the
/// display name at query time.
#[utoipa::path(
    get,
    path = "/core/stops/{identifier}",
    params(("identifier" = String, Path, description = "Stop primary identifier")),
    responses(
        (status = 200, description = "The stop", body = StopResponse),
        (status = 404, description = "Unknown stop", body = ErrorResponse)
    ),
    tag = "stops"
)]
pub async fn get_stop(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<StopResponse>, ApiError> {
    let stop = state
        .store
        .find_stop(&identifier)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Could not find stop matching stop identifier"))?;

    let services = state
        .store
        .find_services_for_stop(&identifier)
        .await
        .map_err(internal_error)?;

    let mut stop = stop;
    for service in &services {
        stop.update_name_from_service_overrides(service);
    }
    state.transformer.apply_stop(&mut stop);

    let service_views = services
        .into_iter()
        .map(|s| ServiceView {
            primary_identifier: s.primary_identifier,
            service_name: s.service_name,
        })
        .collect();

    Ok(Json(stop_response(stop, service_views)))
}

#[derive(Debug, Deserialize)]
pub struct DeparturesQuery {
    pub count: Option<String>,
    pub datetime: Option<String>,
}

/// Departure board for a stop: scheduled departures fused with active
/// realtime estimates, time-sorted, truncated to `count`.
#[utoipa::path(
    get,
    path = "/core/stops/{identifier}/departures",
    params(
        ("identifier" = String, Path, description = "Stop primary identifier"),
        ("count" = Option<u32>, Query, description = "Maximum departures to return"),
        ("datetime" = Option<String>, Query, description = "RFC3339 start time, defaults to now")
    ),
    responses(
        (status = 200, description = "Time-ordered departures", body = [TimetableRecord]),
        (status = 400, description = "Bad parameter", body = ErrorResponse),
        (status = 404, description = "Unknown stop", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    ),
    tag = "stops"
)]
pub async fn get_stop_departures(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Query(query): Query<DeparturesQuery>,
) -> Result<Json<Vec<TimetableRecord>>, ApiError> {
    let count = match &query.count {
        None => state.default_board_count,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| bad_request("Parameter count should be a non-negative integer"))?,
    };

    let start: DateTime<Utc> = match &query.datetime {
        None => Utc::now(),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| bad_request("Parameter datetime should be an RFC3339 datetime"))?,
    };

    state
        .store
        .find_stop(&identifier)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Could not find stop matching stop identifier"))?;

    let mut records = timetable::departure_board(
        &state.store,
        &identifier,
        count,
        start,
        state.timezone,
        state.active_cutoff,
        Utc::now(),
    )
    .await
    .map_err(internal_error)?;

    attach_references(&state, &mut records)
        .await
        .map_err(internal_error)?;

    Ok(Json(records))
}

/// Resolve each record's service and operator views, one store read per
/// distinct reference, and run the presentation transforms over them.
async fn attach_references(
    state: &AppState,
    records: &mut [TimetableRecord],
) -> Result<(), StoreError> {
    let mut services: HashMap<String, Option<ServiceView>> = HashMap::new();
    let mut operators: HashMap<String, Option<OperatorView>> = HashMap::new();

    for record in records.iter_mut() {
        let service_ref = record.journey.service_ref.clone();
        let service_view = match services.get(&service_ref) {
            Some(cached) => cached.clone(),
            None => {
                let view = state.store.find_service(&service_ref).await?.map(|s| ServiceView {
                    primary_identifier: s.primary_identifier,
                    service_name: s.service_name,
                });
                services.insert(service_ref, view.clone());
                view
            }
        };

        let operator_ref = record.journey.operator_ref.clone();
        let operator_view = match operators.get(&operator_ref) {
            Some(cached) => cached.clone(),
            None => {
                let view = state
                    .store
                    .find_operator_by_any_identifier(&operator_ref)
                    .await?
                    .map(|o| {
                        let mut view = OperatorView {
                            primary_identifier: o.primary_identifier,
                            primary_name: o.primary_name,
                        };
                        state.transformer.apply_operator(&mut view);
                        view
                    });
                operators.insert(operator_ref, view.clone());
                view
            }
        };

        record.journey.service = service_view;
        record.journey.operator = operator_view;
    }
    Ok(())
}
