use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::Order;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub order: Order,
    pub agent_id: Uuid,
    pub agent_name: String,
    pub vehicle_number: String,
    pub distance_km: f64,
    pub assigned_at: DateTime<Utc>,
}
