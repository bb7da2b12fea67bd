//! WebSocket client connection state.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Unique identity of a client connection (`conn_<uuid v7>`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh, time-ordered identity.
    pub fn generate() -> Self {
        Self(format!("conn_{}", uuid::Uuid::now_v7()))
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a message could not be queued for a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection has been closed or its writer has gone away.
    #[error("connection closed")]
    Closed,
    /// The bounded outbound queue is full.
    #[error("send queue full")]
    Full,
    /// The payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialize(String),
}

/// A connected WebSocket client.
pub struct ClientConnection {
    id: ConnectionId,
    /// Send half of the outbound queue; `None` once closed.
    tx: Mutex<Option<mpsc::Sender<Arc<String>>>>,
    groups: RwLock<HashSet<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat check.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection around the outbound queue's sender.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx: Mutex::new(Some(tx)),
            groups: RwLock::new(HashSet::new()),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Connection identity.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a text frame without waiting.
    ///
    /// A full queue drops the message and bumps the drop counter.
    pub fn send(&self, message: Arc<String>) -> Result<(), SendError> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(SendError::Closed);
        };
        match tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Serialize a value and queue it.
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), SendError> {
        let json = serde_json::to_string(value).map_err(|e| SendError::Serialize(e.to_string()))?;
        self.send(Arc::new(json))
    }

    /// Close the outbound queue. Idempotent.
    ///
    /// Dropping the sender lets the writer task drain what is queued and stop.
    pub fn close(&self) {
        drop(self.tx.lock().take());
    }

    /// Whether [`close`](Self::close) was called or the writer went away.
    pub fn is_closed(&self) -> bool {
        self.tx.lock().as_ref().is_none_or(mpsc::Sender::is_closed)
    }

    /// Add this connection to a group. Returns `false` if already a member.
    pub fn join_group(&self, group: &str) -> bool {
        self.groups.write().insert(group.to_owned())
    }

    /// Remove this connection from a group. Returns `false` if not a member.
    pub fn leave_group(&self, group: &str) -> bool {
        self.groups.write().remove(group)
    }

    /// Whether this connection belongs to `group`.
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.read().contains(group)
    }

    /// Current group memberships (sorted).
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.groups.read().iter().cloned().collect();
        groups.sort();
        groups
    }

    /// Mark the connection as alive (pong or any inbound activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Total messages dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("groups", &self.groups())
            .finish_non_exhaustive()
    }
}
