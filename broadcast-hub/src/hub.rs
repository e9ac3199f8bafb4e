//! Connection registry and message routing.
//!
//! Every live connection owns a bounded outbound queue. The hub only ever
//! `try_send`s onto those queues, so a slow or vanished client loses its own
//! messages without holding up anyone else's.

use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use rand::Rng;
use tokio::sync::{
    RwLock,
    mpsc::{self, error::TrySendError},
};
use tracing::{debug, info, warn};

use crate::protocol::{self, ServerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct Connection {
    peer: Option<SocketAddr>,
    tx: mpsc::Sender<ServerEvent>,
}

impl Connection {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Returned from [`Hub::connect`]; the receiver feeds the connection's writer.
pub struct Registration {
    pub id: ConnectionId,
    pub ordinal: usize,
    pub outbound: mpsc::Receiver<ServerEvent>,
}

/// Smallest queue that holds a newcomer's welcome and its join announcement
/// before the writer starts draining.
pub const MIN_QUEUE_CAPACITY: usize = 2;

pub struct Hub {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

type Recipients = Vec<(ConnectionId, mpsc::Sender<ServerEvent>)>;

impl Hub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(MIN_QUEUE_CAPACITY),
        }
    }

    fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of live connections.
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Registers a new connection, welcomes it privately and announces the
    /// new total to everyone, the newcomer included.
    ///
    /// Announcements are queued while the write lock is held, so every client
    /// sees join and leave totals in registry order.
    pub async fn connect(&self, peer: Option<SocketAddr>) -> Registration {
        let id = self.next_id();
        let (tx, outbound) = mpsc::channel(self.queue_capacity);

        let ordinal = {
            let mut connections = self.connections.write().await;
            connections.insert(id, Connection { peer, tx: tx.clone() });
            let ordinal = connections.len();
            deliver(id, &tx, ServerEvent::welcome(ordinal));
            fan_out(&snapshot(&connections, None), &ServerEvent::joined(ordinal));
            ordinal
        };

        info!(conn_id = %id, ?peer, clients = ordinal, "client connected");

        Registration {
            id,
            ordinal,
            outbound,
        }
    }

    /// Removes a connection and tells the remaining ones the new total.
    ///
    /// Unknown or already-removed ids are ignored and return `None`.
    pub async fn disconnect(&self, id: ConnectionId) -> Option<usize> {
        let (removed, remaining) = {
            let mut connections = self.connections.write().await;
            let removed = connections.remove(&id)?;
            let remaining = connections.len();
            fan_out(&snapshot(&connections, None), &ServerEvent::left(remaining));
            (removed, remaining)
        };

        info!(conn_id = %id, peer = ?removed.peer, clients = remaining, "client disconnected");
        Some(remaining)
    }

    /// Echoes `text` to its sender, then relays it to every other connection.
    ///
    /// Both payloads carry the same timestamp. Returns how many relays were
    /// queued.
    pub async fn relay_chat(&self, from: ConnectionId, text: &str) -> usize {
        let (origin, others) = {
            let connections = self.connections.read().await;
            let origin = connections.get(&from).map(|conn| conn.tx.clone());
            (origin, snapshot(&connections, Some(from)))
        };

        debug!(conn_id = %from, text, "received client message");
        let timestamp = protocol::now();
        if let Some(origin) = origin {
            deliver(from, &origin, ServerEvent::echo(text, timestamp));
        }
        fan_out(&others, &ServerEvent::relay(text, timestamp))
    }

    /// Sends an event to a single connection, if it is still registered.
    pub async fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let tx = {
            let connections = self.connections.read().await;
            connections.get(&id).map(|conn| conn.tx.clone())
        };
        match tx {
            Some(tx) => deliver(id, &tx, event),
            None => false,
        }
    }

    /// Sends an event to every connection. Returns how many queues accepted it.
    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        let recipients = {
            let connections = self.connections.read().await;
            snapshot(&connections, None)
        };
        fan_out(&recipients, &event)
    }

    /// Draws a value in `1..=100` and broadcasts it, unless nobody is
    /// connected, in which case nothing is drawn or sent.
    pub async fn publish_update<R: Rng>(&self, rng: &mut R) -> Option<u8> {
        let recipients = {
            let connections = self.connections.read().await;
            snapshot(&connections, None)
        };
        if recipients.is_empty() {
            return None;
        }

        let value: u8 = rng.gen_range(1..=100);
        debug!(value, clients = recipients.len(), "emitting random update");
        fan_out(&recipients, &ServerEvent::update(value, protocol::now()));
        Some(value)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(64)
    }
}

fn snapshot(
    connections: &HashMap<ConnectionId, Connection>,
    exclude: Option<ConnectionId>,
) -> Recipients {
    connections
        .iter()
        .filter(|(id, conn)| Some(**id) != exclude && conn.is_open())
        .map(|(id, conn)| (*id, conn.tx.clone()))
        .collect()
}

fn fan_out(recipients: &Recipients, event: &ServerEvent) -> usize {
    recipients
        .iter()
        .filter(|(id, tx)| deliver(*id, tx, event.clone()))
        .count()
}

fn deliver(id: ConnectionId, tx: &mpsc::Sender<ServerEvent>, event: ServerEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(conn_id = %id, "outbound queue full, dropping message");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(conn_id = %id, "outbound queue closed, skipping");
            false
        }
    }
}
