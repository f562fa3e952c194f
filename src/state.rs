use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::CredentialVerifier;
use crate::config::Config;
use crate::events::EventBus;
use crate::geo::GeoIndex;
use crate::models::agent::Agent;
use crate::models::order::{Order, TrackingEntry};
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub orders: DashMap<Uuid, Order>,
    pub tracking: DashMap<Uuid, Vec<TrackingEntry>>,
    pub agents: DashMap<Uuid, Agent>,
    pub geo: GeoIndex,
    pub events: EventBus,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub metrics: Metrics,
    pub settings: Config,
    order_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl AppState {
    pub fn new(settings: Config, verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            orders: DashMap::new(),
            tracking: DashMap::new(),
            agents: DashMap::new(),
            geo: GeoIndex::new(),
            events: EventBus::new(settings.event_buffer_size),
            verifier,
            metrics: Metrics::new(),
            settings,
            order_locks: DashMap::new(),
        }
    }

    /// Exclusive lock serializing all mutations of one order. Every
    /// read-modify-write of an order's status goes through this.
    pub fn order_lock(&self, order_id: Uuid) -> Arc<Mutex<()>> {
        self.order_locks
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
