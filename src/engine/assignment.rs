use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::engine::lifecycle::{self, TransitionOutcome};
use crate::error::AppError;
use crate::models::agent::AgentStatus;
use crate::models::assignment::AssignmentResult;
use crate::models::order::{OrderStatus, TrackingEntry};
use crate::state::AppState;

/// Binds the nearest available agent to a pending order.
///
/// Runs under the order's exclusive lock. Agent availability is claimed
/// with a compare-and-swap on the agents map, so two assignments racing
/// for the same agent resolve to one winner; the loser falls through to
/// the next-nearest candidate. Either the full claim + transition +
/// tracking entry commits, or nothing does.
pub async fn assign(
    state: &AppState,
    order_id: Uuid,
) -> Result<(AssignmentResult, TrackingEntry), AppError> {
    let lock = state.order_lock(order_id);
    let _guard = lock.lock().await;

    let order = state
        .orders
        .get(&order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    if order.agent_id.is_some() {
        return Err(AppError::AlreadyAssigned(order_id));
    }

    if order.status != OrderStatus::Pending {
        return Err(AppError::InvalidTransition {
            from: order.status,
            to: OrderStatus::Accepted,
        });
    }

    let max_km = state.settings.max_assign_distance_km;
    let candidates = state.geo.nearest(&order.pickup, max_km, |agent_id| {
        state
            .agents
            .get(&agent_id)
            .map(|agent| agent.status == AgentStatus::Available)
            .unwrap_or(false)
    });

    if candidates.is_empty() {
        return Err(AppError::NoAvailableAgent(max_km));
    }

    for candidate in candidates {
        if !claim_agent(state, candidate.agent_id) {
            warn!(
                order_id = %order_id,
                agent_id = %candidate.agent_id,
                "agent claimed by a concurrent assignment; trying next candidate"
            );
            continue;
        }

        let Some(agent) = state
            .agents
            .get(&candidate.agent_id)
            .map(|entry| entry.value().clone())
        else {
            release_agent(state, candidate.agent_id);
            continue;
        };

        if let Some(mut stored) = state.orders.get_mut(&order_id) {
            stored.agent_id = Some(agent.id);
        }

        let description = format!("Assigned to {} ({})", agent.name, agent.vehicle_number);
        match lifecycle::transition_locked(
            state,
            order_id,
            OrderStatus::Accepted,
            Identity::system(),
            Some(description),
            None,
        ) {
            Ok(TransitionOutcome::Applied { order, entry }) => {
                info!(
                    order_id = %order_id,
                    agent_id = %agent.id,
                    distance_km = candidate.distance_km,
                    "agent assigned"
                );

                let result = AssignmentResult {
                    order,
                    agent_id: agent.id,
                    agent_name: agent.name,
                    vehicle_number: agent.vehicle_number,
                    distance_km: candidate.distance_km,
                    assigned_at: entry.created_at,
                };
                return Ok((result, entry));
            }
            Ok(TransitionOutcome::NoOp { .. }) => {
                rollback(state, order_id, agent.id);
                return Err(AppError::AssignmentFailed(
                    "order already accepted".to_string(),
                ));
            }
            Err(err) => {
                rollback(state, order_id, agent.id);
                return Err(AppError::AssignmentFailed(err.to_string()));
            }
        }
    }

    Err(AppError::NoAvailableAgent(max_km))
}

/// Compare-and-swap of agent availability: succeeds only if the agent is
/// still available, atomically with respect to every other claim for the
/// same agent.
fn claim_agent(state: &AppState, agent_id: Uuid) -> bool {
    match state.agents.get_mut(&agent_id) {
        Some(mut agent) if agent.status == AgentStatus::Available => {
            agent.status = AgentStatus::Busy;
            agent.updated_at = Utc::now();
            true
        }
        _ => false,
    }
}

fn release_agent(state: &AppState, agent_id: Uuid) {
    if let Some(mut agent) = state.agents.get_mut(&agent_id) {
        if agent.status == AgentStatus::Busy {
            agent.status = AgentStatus::Available;
            agent.updated_at = Utc::now();
        }
    }
}

fn rollback(state: &AppState, order_id: Uuid, agent_id: Uuid) {
    if let Some(mut stored) = state.orders.get_mut(&order_id) {
        stored.agent_id = None;
    }
    release_agent(state, agent_id);
}
