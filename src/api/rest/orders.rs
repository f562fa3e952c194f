use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{ActorRole, AuthIdentity};
use crate::coordinator::{self, OrderSnapshot};
use crate::engine::lifecycle::OrderSpec;
use crate::error::AppError;
use crate::models::agent::GeoPoint;
use crate::models::assignment::AssignmentResult;
use crate::models::order::{Order, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", patch(update_status))
        .route("/orders/:id/assign-agent", post(assign_agent))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub description: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    auth: AuthIdentity,
    Json(payload): Json<OrderSpec>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let customer = auth.require(ActorRole::Customer)?;
    let order = coordinator::create_order(&state, customer, payload).await?;

    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderSnapshot>, AppError> {
    Ok(Json(coordinator::order_snapshot(&state, id)?))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    auth: AuthIdentity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    let location = match (payload.location_lat, payload.location_lng) {
        (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
        (None, None) => None,
        _ => {
            return Err(AppError::Validation(
                "location_lat and location_lng must be provided together".to_string(),
            ))
        }
    };

    let order = coordinator::update_order_status(
        &state,
        id,
        payload.status,
        auth.0,
        payload.description,
        location,
    )
    .await?;

    Ok(Json(order))
}

async fn assign_agent(
    State(state): State<Arc<AppState>>,
    auth: AuthIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<AssignmentResult>, AppError> {
    auth.require(ActorRole::Admin)?;
    let result = coordinator::assign_agent(&state, id).await?;

    Ok(Json(result))
}
