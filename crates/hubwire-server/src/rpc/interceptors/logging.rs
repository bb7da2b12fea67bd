//! Interceptor that traces every phase of an invocation.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::rpc::context::InvocationContext;
use crate::rpc::errors::HandlerFault;
use crate::rpc::interceptor::Interceptor;

/// Logs invocations through `tracing` and counts the completed ones.
#[derive(Debug, Default)]
pub struct InvocationLogger {
    completed: AtomicU64,
    failed: AtomicU64,
}

impl InvocationLogger {
    /// Create a logger with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Invocations whose handler returned a result.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Invocations whose handler faulted.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Interceptor for InvocationLogger {
    fn name(&self) -> &str {
        "InvocationLogger"
    }

    async fn before_invoke(&self, ctx: &InvocationContext) -> bool {
        info!(
            conn_id = %ctx.connection_id(),
            invocation_id = ctx.invocation_id(),
            target_name = ctx.target(),
            method = ctx.method(),
            args = ctx.args().len(),
            "invocation started"
        );
        true
    }

    async fn after_invoke(&self, result: Value, ctx: &InvocationContext) -> Value {
        let _ = self.completed.fetch_add(1, Ordering::Relaxed);
        info!(
            invocation_id = ctx.invocation_id(),
            target_name = ctx.target(),
            method = ctx.method(),
            "invocation completed"
        );
        result
    }

    async fn on_error(&self, fault: &HandlerFault, ctx: &InvocationContext) {
        let _ = self.failed.fetch_add(1, Ordering::Relaxed);
        warn!(
            invocation_id = ctx.invocation_id(),
            target_name = ctx.target(),
            method = ctx.method(),
            kind = fault.kind(),
            error = %fault,
            "invocation failed"
        );
    }
}
