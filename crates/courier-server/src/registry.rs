//! Connection registry for streaming subscribers.
//!
//! Each [`Connection`] owns the sending half of a bounded channel; the
//! subscription response stream owns the receiving half. The registry is the
//! only place connections are inserted, removed, or enumerated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use courier_core::ConnectionId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// One unit written to a subscriber's stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Initial acknowledgment carrying the subscriber's id.
    Connected(ConnectionId),
    /// A serialized event envelope, shared across all recipients.
    Event(Arc<str>),
    /// Comment-only frame that keeps intermediaries from reaping the stream.
    KeepAlive,
}

impl Frame {
    /// Encode as `text/event-stream` wire bytes.
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Connected(id) => {
                let payload = json!({ "clientId": id });
                Bytes::from(format!("event: connected\ndata: {payload}\n\n"))
            }
            Self::Event(data) => {
                let mut out = String::with_capacity(data.len() + 8);
                for line in data.split('\n') {
                    out.push_str("data: ");
                    out.push_str(line);
                    out.push('\n');
                }
                out.push('\n');
                Bytes::from(out)
            }
            Self::KeepAlive => Bytes::from_static(b":\n\n"),
        }
    }
}

/// Result of a single non-blocking write to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Queue full; this frame was dropped for this connection only.
    Full,
    /// Receiver gone; the transport is closed.
    Closed,
}

/// A subscribed client.
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    dropped_frames: AtomicU64,
}

impl Connection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            id,
            tx,
            dropped_frames: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a frame without waiting.
    pub fn send(&self, frame: Frame) -> SendOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => SendOutcome::Delivered,
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Full
            }
            Err(TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Frames dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("dropped_frames", &self.drop_count())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
    #[error("registry is closed")]
    Closed,
}

/// The set of live connections, keyed by id.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    queue_capacity: usize,
    /// Inserts hold the read side while they check and insert; `close_all`
    /// holds the write side, so no insert can land after the final clear.
    closed: RwLock<bool>,
}

impl ConnectionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
            closed: RwLock::new(false),
        }
    }

    /// Allocate an id and channel, register the connection, and hand back the
    /// receiving half for the response stream.
    pub fn open(&self) -> Result<(Arc<Connection>, mpsc::Receiver<Frame>), RegistryError> {
        self.open_inner(false)
    }

    /// Like [`open`](Self::open), but the `connected` acknowledgment is queued
    /// before the connection becomes visible to broadcasts, so it is always
    /// the first frame the subscriber reads.
    pub fn open_acknowledged(
        &self,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<Frame>), RegistryError> {
        self.open_inner(true)
    }

    fn open_inner(
        &self,
        acknowledge: bool,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<Frame>), RegistryError> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let connection = Arc::new(Connection::new(ConnectionId::new(), tx));
        if acknowledge {
            let _ = connection.send(Frame::Connected(connection.id().clone()));
        }
        self.insert(connection.clone())?;
        Ok((connection, rx))
    }

    pub fn insert(&self, connection: Arc<Connection>) -> Result<(), RegistryError> {
        let closed = self.closed.read();
        if *closed {
            return Err(RegistryError::Closed);
        }
        match self.connections.entry(connection.id().clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateConnection(connection.id().clone())),
            Entry::Vacant(slot) => {
                debug!(connection_id = %connection.id(), "connection registered");
                let _ = slot.insert(connection);
                Ok(())
            }
        }
    }

    /// Remove a connection. Absent ids are a no-op; returns whether one was removed.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.remove(id).is_some();
        if removed {
            debug!(connection_id = %id, "connection removed");
        }
        removed
    }

    /// Stable copy of the current connections.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Refuse new connections and drop every sink so open streams end.
    pub fn close_all(&self) -> usize {
        let mut closed = self.closed.write();
        *closed = true;
        let count = self.connections.len();
        self.connections.clear();
        count
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }
}
