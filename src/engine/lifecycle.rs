use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{ActorRole, Identity};
use crate::error::AppError;
use crate::models::agent::GeoPoint;
use crate::models::order::{Order, OrderItem, OrderStatus, TrackingEntry};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderSpec {
    pub restaurant_id: Uuid,
    pub items: Vec<OrderItem>,
    pub total_amount: f64,
    pub delivery_address: String,
    pub delivery_lat: f64,
    pub delivery_lng: f64,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
}

#[derive(Debug)]
pub enum TransitionOutcome {
    Applied { order: Order, entry: TrackingEntry },
    /// Re-request of the order's current status: success, nothing written.
    NoOp { order: Order },
}

/// Validates the commercial and geometric fields of an order spec and
/// creates the order together with its initial `pending` tracking entry.
/// The tracking entry is inserted before the order becomes visible, so a
/// half-created order is never observable.
pub async fn create_order(
    state: &AppState,
    customer_id: Uuid,
    spec: OrderSpec,
) -> Result<(Order, TrackingEntry), AppError> {
    validate_spec(&spec)?;

    let now = Utc::now();
    let id = Uuid::new_v4();
    let order = Order {
        id,
        order_number: order_number(),
        customer_id,
        restaurant_id: spec.restaurant_id,
        agent_id: None,
        items: spec.items,
        total_amount: spec.total_amount,
        delivery_address: spec.delivery_address,
        pickup: GeoPoint {
            lat: spec.pickup_lat,
            lng: spec.pickup_lng,
        },
        delivery: GeoPoint {
            lat: spec.delivery_lat,
            lng: spec.delivery_lng,
        },
        status: OrderStatus::Pending,
        created_at: now,
        updated_at: now,
    };

    let entry = TrackingEntry {
        order_id: id,
        status: OrderStatus::Pending,
        description: Some("Order placed successfully".to_string()),
        location: None,
        created_at: now,
    };

    state.tracking.insert(id, vec![entry.clone()]);
    state.orders.insert(id, order.clone());

    tracing::info!(order_id = %id, order_number = %order.order_number, "order created");

    Ok((order, entry))
}

/// Validated status transition. Serialized per order id: concurrent calls
/// on the same order are linearized, so the second caller is evaluated
/// against the first caller's committed state.
pub async fn transition(
    state: &AppState,
    order_id: Uuid,
    requested: OrderStatus,
    actor: Identity,
    description: Option<String>,
    location: Option<GeoPoint>,
) -> Result<TransitionOutcome, AppError> {
    let lock = state.order_lock(order_id);
    let _guard = lock.lock().await;

    transition_locked(state, order_id, requested, actor, description, location)
}

/// Transition body for callers already holding the order lock. Contains no
/// await points: once it starts, the status update and tracking append
/// commit as a unit or not at all.
pub(crate) fn transition_locked(
    state: &AppState,
    order_id: Uuid,
    requested: OrderStatus,
    actor: Identity,
    description: Option<String>,
    location: Option<GeoPoint>,
) -> Result<TransitionOutcome, AppError> {
    if let Some(point) = &location {
        if !point.in_range() {
            return Err(AppError::Validation(format!(
                "coordinates out of range: ({}, {})",
                point.lat, point.lng
            )));
        }
    }

    let current = state
        .orders
        .get(&order_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

    authorize(&actor, &current, requested)?;

    if current.status == requested {
        return Ok(TransitionOutcome::NoOp { order: current });
    }

    if !current.status.allows(requested) {
        return Err(AppError::InvalidTransition {
            from: current.status,
            to: requested,
        });
    }

    let now = Utc::now();
    let entry = TrackingEntry {
        order_id,
        status: requested,
        description,
        location,
        created_at: now,
    };

    state.tracking.entry(order_id).or_default().push(entry.clone());

    let updated = {
        let mut stored = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::Internal(format!("order {order_id} vanished")))?;
        stored.status = requested;
        stored.updated_at = now;
        stored.clone()
    };

    tracing::info!(
        order_id = %order_id,
        from = current.status.as_str(),
        to = requested.as_str(),
        "order transitioned"
    );

    Ok(TransitionOutcome::Applied {
        order: updated,
        entry,
    })
}

/// Role rules: the assigned agent drives every non-cancel transition, only
/// an admin may cancel, and the internal system role acts on behalf of the
/// assignment engine.
fn authorize(actor: &Identity, order: &Order, requested: OrderStatus) -> Result<(), AppError> {
    match actor.role {
        ActorRole::System => Ok(()),
        ActorRole::Admin => {
            if requested == OrderStatus::Cancelled {
                Ok(())
            } else {
                Err(AppError::Forbidden(
                    "admins may only cancel orders".to_string(),
                ))
            }
        }
        ActorRole::Agent => {
            if requested == OrderStatus::Cancelled {
                Err(AppError::Forbidden(
                    "only an admin may cancel an order".to_string(),
                ))
            } else if order.agent_id == Some(actor.id) {
                Ok(())
            } else {
                Err(AppError::Forbidden(
                    "order is not assigned to this agent".to_string(),
                ))
            }
        }
        ActorRole::Customer => Err(AppError::Forbidden(
            "customers cannot change order status".to_string(),
        )),
    }
}

fn validate_spec(spec: &OrderSpec) -> Result<(), AppError> {
    if spec.items.is_empty() {
        return Err(AppError::Validation(
            "order must contain at least one item".to_string(),
        ));
    }

    for item in &spec.items {
        if item.name.trim().is_empty() {
            return Err(AppError::Validation("item name cannot be empty".to_string()));
        }
        if item.quantity < 1 {
            return Err(AppError::Validation(format!(
                "item '{}' quantity must be >= 1",
                item.name
            )));
        }
        if item.price <= 0.0 {
            return Err(AppError::Validation(format!(
                "item '{}' price must be > 0",
                item.name
            )));
        }
    }

    if spec.total_amount <= 0.0 {
        return Err(AppError::Validation("total_amount must be > 0".to_string()));
    }

    if spec.delivery_address.trim().is_empty() {
        return Err(AppError::Validation(
            "delivery_address cannot be empty".to_string(),
        ));
    }

    let pickup = GeoPoint {
        lat: spec.pickup_lat,
        lng: spec.pickup_lng,
    };
    let delivery = GeoPoint {
        lat: spec.delivery_lat,
        lng: spec.delivery_lng,
    };
    if !pickup.in_range() || !delivery.in_range() {
        return Err(AppError::Validation(
            "pickup and delivery coordinates must be valid lat/lng pairs".to_string(),
        ));
    }

    Ok(())
}

fn order_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ORD-{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::{create_order, transition, OrderSpec, TransitionOutcome};
    use crate::auth::{ActorRole, Identity, TokenTable};
    use crate::config::Config;
    use crate::error::AppError;
    use crate::models::order::{OrderItem, OrderStatus};
    use crate::state::AppState;

    fn test_state() -> Arc<AppState> {
        let settings = Config {
            http_port: 0,
            log_level: "info".to_string(),
            event_buffer_size: 8,
            max_assign_distance_km: 50.0,
            op_deadline_ms: 5_000,
            admin_token: None,
        };
        Arc::new(AppState::new(settings, Arc::new(TokenTable::new())))
    }

    fn pizza_spec() -> OrderSpec {
        OrderSpec {
            restaurant_id: Uuid::from_u128(100),
            items: vec![OrderItem {
                name: "Pizza".to_string(),
                quantity: 2,
                price: 10.0,
            }],
            total_amount: 20.0,
            delivery_address: "1 Main St".to_string(),
            delivery_lat: 52.54,
            delivery_lng: 13.42,
            pickup_lat: 52.51,
            pickup_lng: 13.39,
        }
    }

    fn agent(id: Uuid) -> Identity {
        Identity {
            id,
            role: ActorRole::Agent,
        }
    }

    fn admin() -> Identity {
        Identity {
            id: Uuid::from_u128(999),
            role: ActorRole::Admin,
        }
    }

    #[tokio::test]
    async fn create_writes_pending_order_with_one_tracking_entry() {
        let state = test_state();
        let (order, entry) = create_order(&state, Uuid::from_u128(1), pizza_spec())
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.agent_id.is_none());
        assert!(order.order_number.starts_with("ORD-"));
        assert_eq!(entry.status, OrderStatus::Pending);

        let log = state.tracking.get(&order.id).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn create_rejects_bad_commercial_fields() {
        let state = test_state();
        let customer = Uuid::from_u128(1);

        let mut spec = pizza_spec();
        spec.items.clear();
        assert!(matches!(
            create_order(&state, customer, spec).await,
            Err(AppError::Validation(_))
        ));

        let mut spec = pizza_spec();
        spec.items[0].quantity = 0;
        assert!(matches!(
            create_order(&state, customer, spec).await,
            Err(AppError::Validation(_))
        ));

        let mut spec = pizza_spec();
        spec.items[0].price = 0.0;
        assert!(matches!(
            create_order(&state, customer, spec).await,
            Err(AppError::Validation(_))
        ));

        let mut spec = pizza_spec();
        spec.total_amount = -1.0;
        assert!(matches!(
            create_order(&state, customer, spec).await,
            Err(AppError::Validation(_))
        ));

        let mut spec = pizza_spec();
        spec.pickup_lat = 95.0;
        assert!(matches!(
            create_order(&state, customer, spec).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let state = test_state();
        let result = transition(
            &state,
            Uuid::from_u128(42),
            OrderStatus::Accepted,
            Identity::system(),
            None,
            None,
        )
        .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn skipping_a_stage_is_rejected() {
        let state = test_state();
        let (order, _) = create_order(&state, Uuid::from_u128(1), pizza_spec())
            .await
            .unwrap();

        let result = transition(
            &state,
            order.id,
            OrderStatus::Preparing,
            Identity::system(),
            None,
            None,
        )
        .await;

        assert!(matches!(
            result,
            Err(AppError::InvalidTransition {
                from: OrderStatus::Pending,
                to: OrderStatus::Preparing,
            })
        ));
    }

    #[tokio::test]
    async fn assigned_agent_walks_the_full_path_and_log_is_a_valid_walk() {
        let state = test_state();
        let agent_id = Uuid::from_u128(7);
        let (order, _) = create_order(&state, Uuid::from_u128(1), pizza_spec())
            .await
            .unwrap();

        transition(
            &state,
            order.id,
            OrderStatus::Accepted,
            Identity::system(),
            None,
            None,
        )
        .await
        .unwrap();
        state.orders.get_mut(&order.id).unwrap().agent_id = Some(agent_id);

        for status in [
            OrderStatus::Preparing,
            OrderStatus::ReadyForPickup,
            OrderStatus::PickedUp,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
        ] {
            let outcome = transition(&state, order.id, status, agent(agent_id), None, None)
                .await
                .unwrap();
            assert!(matches!(outcome, TransitionOutcome::Applied { .. }));
        }

        let log = state.tracking.get(&order.id).unwrap().clone();
        assert_eq!(log.len(), 7);
        for pair in log.windows(2) {
            assert!(
                pair[0].status.allows(pair[1].status),
                "{:?} -> {:?}",
                pair[0].status,
                pair[1].status
            );
            assert!(pair[0].created_at <= pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn repeating_the_current_status_is_a_noop_with_no_extra_entry() {
        let state = test_state();
        let agent_id = Uuid::from_u128(7);
        let (order, _) = create_order(&state, Uuid::from_u128(1), pizza_spec())
            .await
            .unwrap();
        transition(
            &state,
            order.id,
            OrderStatus::Accepted,
            Identity::system(),
            None,
            None,
        )
        .await
        .unwrap();
        state.orders.get_mut(&order.id).unwrap().agent_id = Some(agent_id);

        transition(
            &state,
            order.id,
            OrderStatus::Preparing,
            agent(agent_id),
            None,
            None,
        )
        .await
        .unwrap();
        let outcome = transition(
            &state,
            order.id,
            OrderStatus::Preparing,
            agent(agent_id),
            None,
            None,
        )
        .await
        .unwrap();

        assert!(matches!(outcome, TransitionOutcome::NoOp { .. }));

        let entries = state.tracking.get(&order.id).unwrap();
        let preparing = entries
            .iter()
            .filter(|e| e.status == OrderStatus::Preparing)
            .count();
        assert_eq!(preparing, 1);
    }

    #[tokio::test]
    async fn only_the_assigned_agent_may_drive_the_order() {
        let state = test_state();
        let (order, _) = create_order(&state, Uuid::from_u128(1), pizza_spec())
            .await
            .unwrap();
        transition(
            &state,
            order.id,
            OrderStatus::Accepted,
            Identity::system(),
            None,
            None,
        )
        .await
        .unwrap();
        state.orders.get_mut(&order.id).unwrap().agent_id = Some(Uuid::from_u128(7));

        let stranger = agent(Uuid::from_u128(8));
        let result = transition(
            &state,
            order.id,
            OrderStatus::Preparing,
            stranger,
            None,
            None,
        )
        .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        let customer = Identity {
            id: Uuid::from_u128(1),
            role: ActorRole::Customer,
        };
        let result = transition(
            &state,
            order.id,
            OrderStatus::Preparing,
            customer,
            None,
            None,
        )
        .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn only_admin_may_cancel() {
        let state = test_state();
        let agent_id = Uuid::from_u128(7);
        let (order, _) = create_order(&state, Uuid::from_u128(1), pizza_spec())
            .await
            .unwrap();
        state.orders.get_mut(&order.id).unwrap().agent_id = Some(agent_id);

        let result = transition(
            &state,
            order.id,
            OrderStatus::Cancelled,
            agent(agent_id),
            None,
            None,
        )
        .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        let outcome = transition(&state, order.id, OrderStatus::Cancelled, admin(), None, None)
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied { .. }));
    }

    #[tokio::test]
    async fn terminal_orders_cannot_move() {
        let state = test_state();
        let (order, _) = create_order(&state, Uuid::from_u128(1), pizza_spec())
            .await
            .unwrap();
        transition(&state, order.id, OrderStatus::Cancelled, admin(), None, None)
            .await
            .unwrap();

        let result = transition(
            &state,
            order.id,
            OrderStatus::Accepted,
            Identity::system(),
            None,
            None,
        )
        .await;
        assert!(matches!(result, Err(AppError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn concurrent_transitions_on_one_order_are_linearized() {
        let state = test_state();
        let agent_id = Uuid::from_u128(7);
        let (order, _) = create_order(&state, Uuid::from_u128(1), pizza_spec())
            .await
            .unwrap();
        transition(
            &state,
            order.id,
            OrderStatus::Accepted,
            Identity::system(),
            None,
            None,
        )
        .await
        .unwrap();
        state.orders.get_mut(&order.id).unwrap().agent_id = Some(agent_id);

        let a = tokio::spawn({
            let state = state.clone();
            async move {
                transition(
                    &state,
                    order.id,
                    OrderStatus::Preparing,
                    agent(agent_id),
                    None,
                    None,
                )
                .await
            }
        });
        let b = tokio::spawn({
            let state = state.clone();
            async move {
                transition(
                    &state,
                    order.id,
                    OrderStatus::Preparing,
                    agent(agent_id),
                    None,
                    None,
                )
                .await
            }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let applied = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Ok(TransitionOutcome::Applied { .. })))
            .count();
        let noop = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Ok(TransitionOutcome::NoOp { .. })))
            .count();

        assert_eq!(applied, 1, "exactly one call commits");
        assert_eq!(noop, 1, "the loser sees the committed state");

        let entries = state.tracking.get(&order.id).unwrap();
        let preparing = entries
            .iter()
            .filter(|e| e.status == OrderStatus::Preparing)
            .count();
        assert_eq!(preparing, 1);
    }
}
