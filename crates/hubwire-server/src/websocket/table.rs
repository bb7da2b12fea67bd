//! Live connection table.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tracing::debug;

use super::connection::{ClientConnection, ConnectionId};

/// Shared handle to a connection in the table.
pub type ConnectionHandle = Arc<ClientConnection>;

/// Why a connection could not be added.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// A connection with the same identity is already present.
    #[error("connection '{0}' already exists")]
    DuplicateIdentity(ConnectionId),
    /// The table holds `max_connections` entries.
    #[error("connection limit reached ({max})")]
    CapacityReached {
        /// Configured limit.
        max: usize,
    },
}

/// Concurrent map of live connections.
///
/// Sharded: adds, removals and iteration lock one shard at a time, never the
/// whole table. The capacity limit is checked before insertion, so racing adds
/// may briefly exceed it by the number of concurrent upgrades.
pub struct ConnectionTable {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    max_connections: usize,
}

impl ConnectionTable {
    /// Create an empty table with a connection limit.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_connections,
        }
    }

    /// Configured connection limit.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Whether the table is at or above its limit.
    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Register a connection and return its shared handle.
    pub fn add(
        &self,
        id: ConnectionId,
        tx: mpsc::Sender<Arc<String>>,
    ) -> Result<ConnectionHandle, TableError> {
        if self.is_full() {
            return Err(TableError::CapacityReached {
                max: self.max_connections,
            });
        }
        match self.connections.entry(id) {
            Entry::Occupied(entry) => Err(TableError::DuplicateIdentity(entry.key().clone())),
            Entry::Vacant(entry) => {
                let conn = Arc::new(ClientConnection::new(entry.key().clone(), tx));
                let _ = entry.insert(Arc::clone(&conn));
                debug!(conn_id = %conn.id(), "connection added");
                Ok(conn)
            }
        }
    }

    /// Remove a connection and close its send channel.
    ///
    /// Returns the removed handle, if it was present.
    pub fn remove(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        let (_, conn) = self.connections.remove(id)?;
        conn.close();
        debug!(conn_id = %id, "connection removed");
        Some(conn)
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a connection is present.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Handles of every live connection at this instant.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Run `action` on every connection matching `predicate`.
    ///
    /// Matching handles are collected first and `action` runs outside any
    /// table lock, so it may freely call back into the table. Returns the
    /// number of connections `action` ran on.
    pub fn for_each<P, A>(&self, predicate: P, mut action: A) -> usize
    where
        P: Fn(&ClientConnection) -> bool,
        A: FnMut(&ConnectionHandle),
    {
        let matching: Vec<ConnectionHandle> = self
            .connections
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for conn in &matching {
            action(conn);
        }
        matching.len()
    }

    /// Identities of every live connection (sorted).
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> =
            self.connections.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::SendError;

    fn channel() -> (mpsc::Sender<Arc<String>>, mpsc::Receiver<Arc<String>>) {
        mpsc::channel(8)
    }

    #[test]
    fn add_and_get() {
        let table = ConnectionTable::new(10);
        let (tx, _rx) = channel();
        let conn = table.add("conn_a".into(), tx).unwrap();
        assert_eq!(conn.id().as_str(), "conn_a");
        assert_eq!(table.len(), 1);
        assert!(table.contains(&"conn_a".into()));
        assert!(Arc::ptr_eq(&table.get(&"conn_a".into()).unwrap(), &conn));
    }

    #[test]
    fn duplicate_identity_rejected() {
        let table = ConnectionTable::new(10);
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let _ = table.add("conn_a".into(), tx1).unwrap();
        let err = table.add("conn_a".into(), tx2).unwrap_err();
        assert_eq!(err, TableError::DuplicateIdentity("conn_a".into()));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn capacity_enforced() {
        let table = ConnectionTable::new(2);
        let mut rxs = Vec::new();
        for i in 0..2 {
            let (tx, rx) = channel();
            rxs.push(rx);
            let _ = table.add(format!("conn_{i}").into(), tx).unwrap();
        }
        assert!(table.is_full());
        let (tx, _rx) = channel();
        let err = table.add("conn_x".into(), tx).unwrap_err();
        assert_eq!(err, TableError::CapacityReached { max: 2 });
        assert!(err.to_string().contains("limit reached"));
    }

    #[test]
    fn remove_closes_channel() {
        let table = ConnectionTable::new(10);
        let (tx, _rx) = channel();
        let conn = table.add("conn_a".into(), tx).unwrap();

        let removed = table.remove(conn.id()).unwrap();
        assert!(Arc::ptr_eq(&removed, &conn));
        assert!(table.is_empty());
        assert!(conn.is_closed());
        assert_eq!(conn.send(Arc::new("late".into())), Err(SendError::Closed));
        assert!(table.remove(conn.id()).is_none());
    }

    #[test]
    fn for_each_filters_and_counts() {
        let table = ConnectionTable::new(10);
        let mut rxs = Vec::new();
        for i in 0..5 {
            let (tx, rx) = channel();
            rxs.push(rx);
            let conn = table.add(format!("conn_{i}").into(), tx).unwrap();
            if i % 2 == 0 {
                let _ = conn.join_group("even");
            }
        }

        let mut seen = Vec::new();
        let count = table.for_each(
            |c| c.in_group("even"),
            |c| seen.push(c.id().as_str().to_owned()),
        );
        seen.sort();
        assert_eq!(count, 3);
        assert_eq!(seen, vec!["conn_0", "conn_2", "conn_4"]);
    }

    #[test]
    fn for_each_action_may_mutate_table() {
        let table = ConnectionTable::new(10);
        let mut rxs = Vec::new();
        for i in 0..4 {
            let (tx, rx) = channel();
            rxs.push(rx);
            let _ = table.add(format!("conn_{i}").into(), tx).unwrap();
        }
        let count = table.for_each(|_| true, |c| {
            let _ = table.remove(c.id());
        });
        assert_eq!(count, 4);
        assert!(table.is_empty());
    }

    #[test]
    fn ids_sorted_and_snapshot() {
        let table = ConnectionTable::default();
        let mut rxs = Vec::new();
        for id in ["conn_c", "conn_a", "conn_b"] {
            let (tx, rx) = channel();
            rxs.push(rx);
            let _ = table.add(id.into(), tx).unwrap();
        }
        let ids: Vec<String> = table.ids().iter().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["conn_a", "conn_b", "conn_c"]);
        assert_eq!(table.snapshot().len(), 3);
    }

    #[tokio::test]
    async fn concurrent_add_remove() {
        let table = Arc::new(ConnectionTable::new(10_000));
        let mut tasks = Vec::new();
        for i in 0..50 {
            let table = Arc::clone(&table);
            tasks.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(1);
                let id: ConnectionId = format!("conn_{i}").into();
                let _ = table.add(id.clone(), tx).unwrap();
                if i % 2 == 0 {
                    let _ = table.remove(&id);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(table.len(), 25);
    }
}
