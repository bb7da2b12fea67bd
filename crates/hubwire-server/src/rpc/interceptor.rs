//! Interceptor capability attached to registered methods.
//!
//! An interceptor observes or short-circuits the invocations of the methods it
//! is attached to. All three hooks are optional; the defaults let the call
//! through untouched. Which interceptors attach to which method is decided by
//! whoever registers the method, and the list is frozen at registration.

use async_trait::async_trait;
use serde_json::Value;

use crate::rpc::context::InvocationContext;
use crate::rpc::errors::HandlerFault;

/// A per-method invocation interceptor.
///
/// Hooks run sequentially in registration order, in every phase. Interceptors
/// hold no per-call state: the context is borrowed for the duration of one
/// hook call only.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Name reported in logs and in suppressed-result responses.
    fn name(&self) -> &str;

    /// Runs before the handler. Returning `false` vetoes the invocation:
    /// later interceptors' `before_invoke` and the handler are skipped.
    async fn before_invoke(&self, _ctx: &InvocationContext) -> bool {
        true
    }

    /// Runs after a successful handler call. Receives the current result and
    /// returns the (possibly replaced) result handed to the next interceptor.
    async fn after_invoke(&self, result: Value, _ctx: &InvocationContext) -> Value {
        result
    }

    /// Observes a handler fault. Cannot suppress or replace it.
    async fn on_error(&self, _fault: &HandlerFault, _ctx: &InvocationContext) {}
}
