use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::agent::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Preparing,
    ReadyForPickup,
    PickedUp,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Legal successor check. Cancellation is reachable from every
    /// non-terminal state; everything else follows the single delivery path.
    pub fn allows(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        if next == Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Pending, Accepted)
                | (Accepted, Preparing)
                | (Preparing, ReadyForPickup)
                | (ReadyForPickup, PickedUp)
                | (PickedUp, OutForDelivery)
                | (OutForDelivery, Delivered)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Preparing => "preparing",
            OrderStatus::ReadyForPickup => "ready_for_pickup",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::OutForDelivery => "out_for_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub restaurant_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub items: Vec<OrderItem>,
    pub total_amount: f64,
    pub delivery_address: String,
    pub pickup: GeoPoint,
    pub delivery: GeoPoint,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit record. One entry is written for every accepted
/// transition, including the initial `pending` entry at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEntry {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub description: Option<String>,
    pub location: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
}
