//! Shared hub context and per-invocation context.

use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::rpc::errors::HandlerFault;
use crate::rpc::registry::HandlerDescriptor;
use crate::websocket::connection::ConnectionId;
use crate::websocket::gateway::PushGateway;

/// Process-wide services handed to every invocation.
pub struct HubContext {
    /// Push gateway for server-initiated messages.
    pub gateway: Arc<PushGateway>,
    /// When the server started (for uptime calculation).
    pub server_start_time: Instant,
}

impl HubContext {
    /// Create a context around a gateway, stamping the start time now.
    pub fn new(gateway: Arc<PushGateway>) -> Self {
        Self {
            gateway,
            server_start_time: Instant::now(),
        }
    }
}

/// Everything known about one inbound invocation.
///
/// Lives for the duration of a single dispatch and is dropped after the
/// response is written.
pub struct InvocationContext {
    invocation_id: String,
    descriptor: Arc<HandlerDescriptor>,
    connection_id: ConnectionId,
    args: Vec<Value>,
    hub: Arc<HubContext>,
}

impl InvocationContext {
    /// Build a context for a resolved invocation.
    pub fn new(
        invocation_id: String,
        descriptor: Arc<HandlerDescriptor>,
        connection_id: ConnectionId,
        args: Vec<Value>,
        hub: Arc<HubContext>,
    ) -> Self {
        Self {
            invocation_id,
            descriptor,
            connection_id,
            args,
            hub,
        }
    }

    /// Client-chosen invocation id.
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    /// The resolved handler descriptor.
    pub fn descriptor(&self) -> &Arc<HandlerDescriptor> {
        &self.descriptor
    }

    /// Target name as registered.
    pub fn target(&self) -> &str {
        self.descriptor.target()
    }

    /// Method name as registered.
    pub fn method(&self) -> &str {
        self.descriptor.method()
    }

    /// The calling connection.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Positional arguments.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Argument at position `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Deserialize the argument at `index`.
    pub fn arg_as<T: DeserializeOwned>(&self, index: usize) -> Result<T, HandlerFault> {
        let value = self.args.get(index).ok_or_else(|| {
            HandlerFault::invalid_arguments(format!("missing argument {index}"))
        })?;
        T::deserialize(value).map_err(|e| {
            HandlerFault::invalid_arguments(format!("argument {index}: {e}"))
        })
    }

    /// Shared hub services.
    pub fn hub(&self) -> &Arc<HubContext> {
        &self.hub
    }

    /// Shortcut for the push gateway.
    pub fn gateway(&self) -> &PushGateway {
        &self.hub.gateway
    }
}
