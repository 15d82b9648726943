use std::fmt;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorKind {
    Rider,
    Customer,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::Rider => "rider",
            ActorKind::Customer => "customer",
        }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one physical socket, so a late teardown of an old socket never
/// evicts the registration that replaced it.
pub type ConnectionId = Uuid;

#[derive(Clone)]
struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<String>,
}

/// Directory of live rider and customer connections.
///
/// Delivery is fire-and-forget: messages go into a bounded per-connection
/// buffer with `try_send`, and anything that cannot be queued is dropped and
/// logged. A closed buffer means the socket is gone, so its entry is removed.
pub struct ConnectionRegistry {
    riders: DashMap<Uuid, Connection>,
    customers: DashMap<Uuid, Connection>,
    metrics: Metrics,
}

impl ConnectionRegistry {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            riders: DashMap::new(),
            customers: DashMap::new(),
            metrics,
        }
    }

    fn map(&self, kind: ActorKind) -> &DashMap<Uuid, Connection> {
        match kind {
            ActorKind::Rider => &self.riders,
            ActorKind::Customer => &self.customers,
        }
    }

    fn refresh_gauge(&self, kind: ActorKind) {
        self.metrics
            .connections_open
            .with_label_values(&[kind.as_str()])
            .set(self.map(kind).len() as i64);
    }

    /// Registers `outbound` for the actor, replacing any earlier connection.
    pub fn register(
        &self,
        kind: ActorKind,
        actor_id: Uuid,
        outbound: mpsc::Sender<String>,
    ) -> ConnectionId {
        let id = Uuid::new_v4();
        if self
            .map(kind)
            .insert(actor_id, Connection { id, outbound })
            .is_some()
        {
            debug!(kind = %kind, actor_id = %actor_id, "replaced existing connection");
        }
        self.refresh_gauge(kind);
        id
    }

    pub fn unregister(&self, kind: ActorKind, actor_id: Uuid) {
        self.map(kind).remove(&actor_id);
        self.refresh_gauge(kind);
    }

    /// Removes the actor's entry only if it still points at `connection_id`.
    pub fn unregister_connection(&self, kind: ActorKind, actor_id: Uuid, connection_id: ConnectionId) {
        self.map(kind)
            .remove_if(&actor_id, |_, conn| conn.id == connection_id);
        self.refresh_gauge(kind);
    }

    pub fn is_connected(&self, kind: ActorKind, actor_id: Uuid) -> bool {
        self.map(kind).contains_key(&actor_id)
    }

    pub fn len(&self, kind: ActorKind) -> usize {
        self.map(kind).len()
    }

    pub fn send(&self, kind: ActorKind, actor_id: Uuid, message: &str) -> bool {
        self.broadcast(kind, message, &[actor_id]) == 1
    }

    /// Queues `message` for every listed actor and returns how many accepted it.
    /// Unknown, saturated and closed connections are skipped.
    pub fn broadcast(&self, kind: ActorKind, message: &str, actor_ids: &[Uuid]) -> usize {
        let map = self.map(kind);
        let mut delivered = 0;

        for actor_id in actor_ids {
            // clone the handle out so no shard lock is held while sending
            let Some(conn) = map.get(actor_id).map(|entry| entry.value().clone()) else {
                debug!(kind = %kind, actor_id = %actor_id, "no live connection; message skipped");
                self.record_drop(kind);
                continue;
            };

            match conn.outbound.try_send(message.to_string()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(kind = %kind, actor_id = %actor_id, "outbound buffer full; message dropped");
                    self.record_drop(kind);
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(kind = %kind, actor_id = %actor_id, "connection closed; unregistering");
                    self.record_drop(kind);
                    self.unregister_connection(kind, *actor_id, conn.id);
                }
            }
        }

        delivered
    }

    fn record_drop(&self, kind: ActorKind) {
        self.metrics
            .broadcast_dropped_total
            .with_label_values(&[kind.as_str()])
            .inc();
    }
}
