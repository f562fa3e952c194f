use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::agent::LocationSample;
use crate::models::order::{Order, TrackingEntry};

/// Fan-out channel name, matching the realtime room names clients join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Order(Uuid),
    Agent(Uuid),
}

impl Topic {
    pub fn kind(&self) -> &'static str {
        match self {
            Topic::Order(_) => "order",
            Topic::Agent(_) => "agent",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Order(id) => write!(f, "order-{id}"),
            Topic::Agent(id) => write!(f, "agent-{id}"),
        }
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (kind, id) = raw
            .split_once('-')
            .ok_or_else(|| format!("malformed topic: {raw}"))?;
        let id = Uuid::parse_str(id).map_err(|_| format!("malformed topic id: {raw}"))?;

        match kind {
            "order" => Ok(Topic::Order(id)),
            "agent" => Ok(Topic::Agent(id)),
            _ => Err(format!("unknown topic kind: {kind}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum TrackingEvent {
    OrderStatusChanged { order: Order },
    OrderTrackingUpdated { order_id: Uuid, entry: TrackingEntry },
    AgentLocationChanged { sample: LocationSample },
}

/// Per-topic broadcast fan-out. Publishing is fire-and-forget: a topic with
/// no subscribers is a silent no-op, and a lagging subscriber loses the
/// oldest buffered events rather than blocking the publisher.
pub struct EventBus {
    topics: DashMap<Topic, broadcast::Sender<TrackingEvent>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
        }
    }

    /// Delivers `event` to every current subscriber of `topic`, returning
    /// how many subscribers it reached.
    pub fn publish(&self, topic: Topic, event: TrackingEvent) -> usize {
        let Some(tx) = self.topics.get(&topic).map(|entry| entry.value().clone()) else {
            return 0;
        };

        match tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                self.topics
                    .remove_if(&topic, |_, sender| sender.receiver_count() == 0);
                0
            }
        }
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let rx = self
            .topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        Subscription { rx }
    }
}

/// Dropping the subscription unsubscribes; there is no separate close call
/// to get wrong.
pub struct Subscription {
    rx: broadcast::Receiver<TrackingEvent>,
}

impl Subscription {
    /// Next event on the topic, in publish order. Events dropped on
    /// overflow are skipped. Returns `None` once the topic is gone and
    /// drained.
    pub async fn recv(&mut self) -> Option<TrackingEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_receiver(self) -> broadcast::Receiver<TrackingEvent> {
        self.rx
    }
}
