use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{ActorRole, AuthIdentity};
use crate::coordinator;
use crate::error::AppError;
use crate::models::agent::{GeoPoint, LocationSample};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/location/update", post(update_location))
        .route("/location/agent/:id", get(latest_location))
        .route("/location/agent/:id/history", get(location_history))
        .route("/location/active-agents", get(active_agents))
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
}

#[derive(Deserialize)]
pub struct HistoryParams {
    pub hours: Option<i64>,
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    auth: AuthIdentity,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<(StatusCode, Json<LocationSample>), AppError> {
    let agent = auth.require(ActorRole::Agent)?;
    let sample = coordinator::update_agent_location(
        &state,
        agent,
        GeoPoint {
            lat: payload.lat,
            lng: payload.lng,
        },
        payload.accuracy,
        payload.speed,
        payload.heading,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(sample)))
}

async fn latest_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<LocationSample>, AppError> {
    Ok(Json(coordinator::agent_location(&state, id)?))
}

async fn location_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<LocationSample>>, AppError> {
    let hours = params.hours.unwrap_or(24);
    if hours <= 0 {
        return Err(AppError::Validation("hours must be > 0".to_string()));
    }

    Ok(Json(coordinator::agent_history(&state, id, hours)))
}

async fn active_agents(State(state): State<Arc<AppState>>) -> Json<Vec<LocationSample>> {
    Json(coordinator::list_available_agent_locations(&state))
}
