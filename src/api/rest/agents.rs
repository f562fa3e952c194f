use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{ActorRole, AuthIdentity};
use crate::coordinator;
use crate::error::AppError;
use crate::models::agent::{Agent, AgentStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents", post(register_agent).get(list_agents))
        .route("/agents/:id/status", patch(update_agent_status))
}

#[derive(Deserialize)]
pub struct RegisterAgentRequest {
    pub name: String,
    pub vehicle_number: String,
}

#[derive(Deserialize)]
pub struct UpdateAgentStatusRequest {
    pub status: AgentStatus,
}

async fn register_agent(
    State(state): State<Arc<AppState>>,
    auth: AuthIdentity,
    Json(payload): Json<RegisterAgentRequest>,
) -> Result<(StatusCode, Json<Agent>), AppError> {
    auth.require(ActorRole::Admin)?;
    let agent = coordinator::register_agent(&state, payload.name, payload.vehicle_number)?;

    Ok((StatusCode::CREATED, Json(agent)))
}

async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Vec<Agent>> {
    Json(coordinator::list_agents(&state))
}

/// Agents flip their own availability; admins may flip anyone's.
async fn update_agent_status(
    State(state): State<Arc<AppState>>,
    auth: AuthIdentity,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAgentStatusRequest>,
) -> Result<Json<Agent>, AppError> {
    let identity = auth.0;
    let allowed = identity.role == ActorRole::Admin
        || (identity.role == ActorRole::Agent && identity.id == id);
    if !allowed {
        return Err(AppError::Forbidden(
            "only the agent or an admin may change availability".to_string(),
        ));
    }

    let agent = coordinator::set_agent_status(&state, id, payload.status)?;
    Ok(Json(agent))
}
