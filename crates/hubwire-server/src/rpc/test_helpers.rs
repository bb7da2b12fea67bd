//! Shared fakes for rpc unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::rpc::context::{HubContext, InvocationContext};
use crate::rpc::errors::HandlerFault;
use crate::rpc::interceptor::Interceptor;
use crate::rpc::registry::{MethodHandler, MethodRegistry};
use crate::websocket::connection::ConnectionId;
use crate::websocket::gateway::PushGateway;
use crate::websocket::table::ConnectionTable;

// ── Handlers ────────────────────────────────────────────────────────

/// Returns its arguments as an array.
pub struct EchoHandler;

#[async_trait]
impl MethodHandler for EchoHandler {
    async fn handle(&self, ctx: &InvocationContext) -> Result<Value, HandlerFault> {
        Ok(Value::Array(ctx.args().to_vec()))
    }
}

/// Returns a fixed value.
pub struct ConstHandler(pub Value);

#[async_trait]
impl MethodHandler for ConstHandler {
    async fn handle(&self, _ctx: &InvocationContext) -> Result<Value, HandlerFault> {
        Ok(self.0.clone())
    }
}

/// Counts calls and returns `null`.
pub struct CountingHandler(pub Arc<AtomicUsize>);

#[async_trait]
impl MethodHandler for CountingHandler {
    async fn handle(&self, _ctx: &InvocationContext) -> Result<Value, HandlerFault> {
        let _ = self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Null)
    }
}

/// Always fails with the given fault.
pub struct FailHandler(pub HandlerFault);

#[async_trait]
impl MethodHandler for FailHandler {
    async fn handle(&self, _ctx: &InvocationContext) -> Result<Value, HandlerFault> {
        Err(self.0.clone())
    }
}

/// Sleeps before returning.
pub struct SlowHandler(pub Duration);

#[async_trait]
impl MethodHandler for SlowHandler {
    async fn handle(&self, _ctx: &InvocationContext) -> Result<Value, HandlerFault> {
        tokio::time::sleep(self.0).await;
        Ok(json!("done"))
    }
}

/// Panics.
pub struct PanicHandler;

#[async_trait]
impl MethodHandler for PanicHandler {
    async fn handle(&self, _ctx: &InvocationContext) -> Result<Value, HandlerFault> {
        panic!("handler exploded");
    }
}

// ── Interceptors ────────────────────────────────────────────────────

/// Shared call log written by [`RecordingInterceptor`].
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Appends `<name>.<phase>` entries to a shared log.
pub struct RecordingInterceptor {
    name: String,
    log: CallLog,
    veto: bool,
    tag: bool,
}

impl RecordingInterceptor {
    pub fn new_log() -> CallLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_owned(),
            log: Arc::clone(log),
            veto: false,
            tag: false,
        }
    }

    /// `before_invoke` returns `false`.
    pub fn vetoing(name: &str, log: &CallLog) -> Self {
        Self {
            veto: true,
            ..Self::new(name, log)
        }
    }

    /// `after_invoke` wraps the result as `{"by": name, "inner": result}`.
    pub fn tagging(name: &str, log: &CallLog) -> Self {
        Self {
            tag: true,
            ..Self::new(name, log)
        }
    }
}

#[async_trait]
impl Interceptor for RecordingInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn before_invoke(&self, _ctx: &InvocationContext) -> bool {
        self.log.lock().push(format!("{}.before", self.name));
        !self.veto
    }

    async fn after_invoke(&self, result: Value, _ctx: &InvocationContext) -> Value {
        self.log.lock().push(format!("{}.after", self.name));
        if self.tag {
            json!({"by": self.name, "inner": result})
        } else {
            result
        }
    }

    async fn on_error(&self, fault: &HandlerFault, _ctx: &InvocationContext) {
        self.log
            .lock()
            .push(format!("{}.error:{}", self.name, fault.kind()));
    }
}

// ── Contexts ────────────────────────────────────────────────────────

/// A hub context over an empty connection table.
pub fn make_hub() -> Arc<HubContext> {
    let table = Arc::new(ConnectionTable::new(100));
    Arc::new(HubContext::new(Arc::new(PushGateway::new(table))))
}

/// An invocation context for `Test.Echo` backed by `handler`.
pub fn make_context(
    handler: impl MethodHandler + 'static,
    interceptors: Vec<Arc<dyn Interceptor>>,
    args: Vec<Value>,
) -> InvocationContext {
    let mut registry = MethodRegistry::new();
    registry
        .register("Test", "Echo", handler, interceptors)
        .unwrap();
    let descriptor = registry.resolve("Test", "Echo").unwrap();
    InvocationContext::new(
        "inv-test".into(),
        descriptor,
        ConnectionId::generate(),
        args,
        make_hub(),
    )
}
