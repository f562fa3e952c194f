use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::auth::Identity;
use crate::engine::{assignment, lifecycle};
use crate::engine::lifecycle::{OrderSpec, TransitionOutcome};
use crate::error::AppError;
use crate::events::{Topic, TrackingEvent};
use crate::models::agent::{Agent, AgentStatus, GeoPoint, LocationSample};
use crate::models::assignment::AssignmentResult;
use crate::models::order::{Order, OrderStatus, TrackingEntry};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct OrderSnapshot {
    pub order: Order,
    pub tracking: Vec<TrackingEntry>,
}

/// Façade over the lifecycle engine, assignment engine, geo index, and
/// event fan-out. Every mutating operation runs under the configured
/// deadline, and events are published only after the underlying write has
/// committed.
pub async fn create_order(
    state: &AppState,
    customer: Identity,
    spec: OrderSpec,
) -> Result<Order, AppError> {
    let (order, entry) =
        with_deadline(state, lifecycle::create_order(state, customer.id, spec)).await?;

    state
        .metrics
        .order_transitions_total
        .with_label_values(&[OrderStatus::Pending.as_str()])
        .inc();
    publish_order_events(state, &order, &entry);

    Ok(order)
}

pub async fn update_order_status(
    state: &AppState,
    order_id: Uuid,
    requested: OrderStatus,
    actor: Identity,
    description: Option<String>,
    location: Option<GeoPoint>,
) -> Result<Order, AppError> {
    let outcome = with_deadline(
        state,
        lifecycle::transition(state, order_id, requested, actor, description, location),
    )
    .await?;

    match outcome {
        TransitionOutcome::Applied { order, entry } => {
            state
                .metrics
                .order_transitions_total
                .with_label_values(&[requested.as_str()])
                .inc();
            publish_order_events(state, &order, &entry);
            Ok(order)
        }
        TransitionOutcome::NoOp { order } => Ok(order),
    }
}

pub async fn assign_agent(state: &AppState, order_id: Uuid) -> Result<AssignmentResult, AppError> {
    let start = Instant::now();
    let assigned = with_deadline(state, assignment::assign(state, order_id)).await;
    let elapsed = start.elapsed().as_secs_f64();

    match assigned {
        Ok((result, entry)) => {
            state
                .metrics
                .assignment_latency_seconds
                .with_label_values(&["success"])
                .observe(elapsed);
            state
                .metrics
                .assignments_total
                .with_label_values(&["success"])
                .inc();
            state
                .metrics
                .order_transitions_total
                .with_label_values(&[OrderStatus::Accepted.as_str()])
                .inc();

            publish_order_events(state, &result.order, &entry);
            Ok(result)
        }
        Err(err) => {
            state
                .metrics
                .assignment_latency_seconds
                .with_label_values(&["error"])
                .observe(elapsed);
            state
                .metrics
                .assignments_total
                .with_label_values(&["error"])
                .inc();
            error!(order_id = %order_id, error = %err, "assignment failed");
            Err(err)
        }
    }
}

pub async fn update_agent_location(
    state: &AppState,
    agent: Identity,
    location: GeoPoint,
    accuracy: Option<f64>,
    speed: Option<f64>,
    heading: Option<f64>,
) -> Result<LocationSample, AppError> {
    if !state.agents.contains_key(&agent.id) {
        return Err(AppError::NotFound(format!(
            "agent {} is not registered",
            agent.id
        )));
    }

    let sample = LocationSample {
        agent_id: agent.id,
        location,
        accuracy,
        speed,
        heading,
        recorded_at: Utc::now(),
    };
    let stored = with_deadline(state, async { state.geo.upsert(sample) }).await?;

    state.metrics.location_updates_total.inc();
    publish(
        state,
        Topic::Agent(agent.id),
        TrackingEvent::AgentLocationChanged {
            sample: stored.clone(),
        },
    );

    Ok(stored)
}

pub fn order_snapshot(state: &AppState, order_id: Uuid) -> Result<OrderSnapshot, AppError> {
    let order = state
        .orders
        .get(&order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    let tracking = state
        .tracking
        .get(&order_id)
        .map(|entries| entries.value().clone())
        .unwrap_or_default();

    Ok(OrderSnapshot { order, tracking })
}

pub fn agent_location(state: &AppState, agent_id: Uuid) -> Result<LocationSample, AppError> {
    state
        .geo
        .latest(agent_id)
        .ok_or_else(|| AppError::NotFound(format!("no location for agent {agent_id}")))
}

pub fn agent_history(state: &AppState, agent_id: Uuid, hours: i64) -> Vec<LocationSample> {
    let since = Utc::now() - ChronoDuration::hours(hours);
    state.geo.history(agent_id, since)
}

/// Latest sample for every currently-available agent.
pub fn list_available_agent_locations(state: &AppState) -> Vec<LocationSample> {
    let available: Vec<Uuid> = state
        .agents
        .iter()
        .filter(|entry| entry.value().status == AgentStatus::Available)
        .map(|entry| *entry.key())
        .collect();

    available
        .into_iter()
        .filter_map(|agent_id| state.geo.latest(agent_id))
        .collect()
}

pub fn register_agent(
    state: &AppState,
    name: String,
    vehicle_number: String,
) -> Result<Agent, AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation("name cannot be empty".to_string()));
    }
    if vehicle_number.trim().is_empty() {
        return Err(AppError::Validation(
            "vehicle_number cannot be empty".to_string(),
        ));
    }

    let agent = Agent {
        id: Uuid::new_v4(),
        name,
        vehicle_number,
        status: AgentStatus::Available,
        updated_at: Utc::now(),
    };
    state.agents.insert(agent.id, agent.clone());

    Ok(agent)
}

pub fn set_agent_status(
    state: &AppState,
    agent_id: Uuid,
    status: AgentStatus,
) -> Result<Agent, AppError> {
    let mut agent = state
        .agents
        .get_mut(&agent_id)
        .ok_or_else(|| AppError::NotFound(format!("agent {agent_id} not found")))?;

    agent.status = status;
    agent.updated_at = Utc::now();

    Ok(agent.clone())
}

pub fn list_agents(state: &AppState) -> Vec<Agent> {
    state
        .agents
        .iter()
        .map(|entry| entry.value().clone())
        .collect()
}

async fn with_deadline<T>(
    state: &AppState,
    op: impl Future<Output = Result<T, AppError>>,
) -> Result<T, AppError> {
    let deadline = Duration::from_millis(state.settings.op_deadline_ms);
    match tokio::time::timeout(deadline, op).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout),
    }
}

fn publish_order_events(state: &AppState, order: &Order, entry: &TrackingEntry) {
    publish(
        state,
        Topic::Order(order.id),
        TrackingEvent::OrderStatusChanged {
            order: order.clone(),
        },
    );
    publish(
        state,
        Topic::Order(order.id),
        TrackingEvent::OrderTrackingUpdated {
            order_id: order.id,
            entry: entry.clone(),
        },
    );
}

fn publish(state: &AppState, topic: Topic, event: TrackingEvent) {
    state.events.publish(topic, event);
    state
        .metrics
        .events_published_total
        .with_label_values(&[topic.kind()])
        .inc();
}
