//! Push gateway: server-initiated fan-out to connected clients.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use super::connection::{ClientConnection, ConnectionId, SendError};
use super::table::ConnectionTable;
use crate::metrics::PUSH_MESSAGES_TOTAL;
use crate::rpc::types::PushMessage;

/// Outcome of one push call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the message was queued for.
    pub delivered: usize,
    /// Connections that were closed, full, or missing.
    pub dropped: usize,
}

impl DeliveryReport {
    fn record(&mut self, conn: &ClientConnection, payload: &Arc<String>) {
        match conn.send(Arc::clone(payload)) {
            Ok(()) => self.delivered += 1,
            Err(SendError::Closed) => {
                debug!(conn_id = %conn.id(), "push skipped, connection closed");
                self.dropped += 1;
            }
            Err(err) => {
                warn!(conn_id = %conn.id(), error = %err, "push dropped");
                self.dropped += 1;
            }
        }
    }

    fn emit_metrics(self) {
        if self.delivered > 0 {
            counter!(PUSH_MESSAGES_TOTAL, "outcome" => "delivered").increment(self.delivered as u64);
        }
        if self.dropped > 0 {
            counter!(PUSH_MESSAGES_TOTAL, "outcome" => "dropped").increment(self.dropped as u64);
        }
    }
}

/// Pushes messages to one, a group, all, or all-but-one connection.
///
/// Fire-and-forget: per-connection failures are logged and counted in the
/// returned [`DeliveryReport`], never raised.
pub struct PushGateway {
    table: Arc<ConnectionTable>,
}

impl PushGateway {
    /// Create a gateway over a connection table.
    pub fn new(table: Arc<ConnectionTable>) -> Self {
        Self { table }
    }

    /// The underlying connection table.
    pub fn table(&self) -> &Arc<ConnectionTable> {
        &self.table
    }

    /// Push to every connection.
    pub fn send_to_all(&self, message: &PushMessage) -> DeliveryReport {
        self.fan_out(message, |_| true)
    }

    /// Push to every connection except `excluded`.
    pub fn send_to_all_except(
        &self,
        excluded: &ConnectionId,
        message: &PushMessage,
    ) -> DeliveryReport {
        self.fan_out(message, |c| c.id() != excluded)
    }

    /// Push to every member of `group`.
    pub fn send_to_group(&self, group: &str, message: &PushMessage) -> DeliveryReport {
        self.fan_out(message, |c| c.in_group(group))
    }

    /// Push to a single connection.
    pub fn send_to(&self, connection: &ConnectionId, message: &PushMessage) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let Some(payload) = serialize(message) else {
            return report;
        };
        match self.table.get(connection) {
            Some(conn) => report.record(&conn, &payload),
            None => {
                debug!(conn_id = %connection, "push skipped, unknown connection");
                report.dropped += 1;
            }
        }
        report.emit_metrics();
        report
    }

    /// Add a connection to a group. Returns `false` if the connection is
    /// unknown or already a member.
    pub fn add_to_group(&self, connection: &ConnectionId, group: &str) -> bool {
        self.table
            .get(connection)
            .is_some_and(|conn| conn.join_group(group))
    }

    /// Remove a connection from a group. Returns `false` if the connection is
    /// unknown or not a member.
    pub fn remove_from_group(&self, connection: &ConnectionId, group: &str) -> bool {
        self.table
            .get(connection)
            .is_some_and(|conn| conn.leave_group(group))
    }

    /// Identities of the members of `group` (sorted).
    pub fn group_members(&self, group: &str) -> Vec<ConnectionId> {
        let mut members = Vec::new();
        let _ = self
            .table
            .for_each(|c| c.in_group(group), |c| members.push(c.id().clone()));
        members.sort();
        members
    }

    fn fan_out<P>(&self, message: &PushMessage, predicate: P) -> DeliveryReport
    where
        P: Fn(&ClientConnection) -> bool,
    {
        let mut report = DeliveryReport::default();
        let Some(payload) = serialize(message) else {
            return report;
        };
        let recipients = self
            .table
            .for_each(predicate, |conn| report.record(conn, &payload));
        debug!(
            target_name = %message.target,
            method = %message.method,
            recipients,
            delivered = report.delivered,
            dropped = report.dropped,
            "push fan-out"
        );
        report.emit_metrics();
        report
    }
}

fn serialize(message: &PushMessage) -> Option<Arc<String>> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!(target_name = %message.target, method = %message.method, error = %e, "failed to serialize push message");
            None
        }
    }
}
