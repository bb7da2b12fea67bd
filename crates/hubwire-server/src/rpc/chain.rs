//! Interceptor chain engine.
//!
//! Runs a descriptor's interceptors around its handler in three phases:
//! pre-invoke (may veto), invoke (bounded by a timeout, panics caught) and
//! either post-invoke (threads the result) or on-error (observes the fault).

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::rpc::context::InvocationContext;
use crate::rpc::errors::HandlerFault;

/// Default budget for a single handler call.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of running the chain for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    /// The handler ran; the value has passed through every `after_invoke`.
    Completed(Value),
    /// A `before_invoke` hook returned `false`.
    Suppressed {
        /// Name of the vetoing interceptor.
        interceptor: String,
    },
    /// The handler failed; every `on_error` hook has seen the fault.
    Faulted(HandlerFault),
}

/// Executes interceptors and the handler in the fixed registration order.
#[derive(Debug, Clone)]
pub struct InterceptorChain {
    handler_timeout: Duration,
}

impl InterceptorChain {
    /// Create a chain with the given handler timeout.
    pub fn new(handler_timeout: Duration) -> Self {
        Self { handler_timeout }
    }

    /// The configured handler timeout.
    pub fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }

    /// Run all phases for `ctx`.
    ///
    /// A panicking hook is logged and skipped: a pre-invoke panic lets the
    /// call through, a post-invoke panic leaves the result unchanged.
    pub async fn run(&self, ctx: &InvocationContext) -> ChainOutcome {
        let interceptors = ctx.descriptor().interceptors();

        for interceptor in interceptors {
            match AssertUnwindSafe(interceptor.before_invoke(ctx))
                .catch_unwind()
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        target_name = ctx.target(),
                        method = ctx.method(),
                        interceptor = interceptor.name(),
                        "invocation suppressed"
                    );
                    return ChainOutcome::Suppressed {
                        interceptor: interceptor.name().to_owned(),
                    };
                }
                Err(payload) => hook_panicked(ctx, interceptor.name(), "before_invoke", payload.as_ref()),
            }
        }

        match self.invoke(ctx).await {
            Ok(mut result) => {
                for interceptor in interceptors {
                    let hook = interceptor.after_invoke(result.clone(), ctx);
                    result = match AssertUnwindSafe(hook).catch_unwind().await {
                        Ok(next) => next,
                        Err(payload) => {
                            hook_panicked(ctx, interceptor.name(), "after_invoke", payload.as_ref());
                            result
                        }
                    };
                }
                ChainOutcome::Completed(result)
            }
            Err(fault) => {
                for interceptor in interceptors {
                    if let Err(payload) = AssertUnwindSafe(interceptor.on_error(&fault, ctx))
                        .catch_unwind()
                        .await
                    {
                        hook_panicked(ctx, interceptor.name(), "on_error", payload.as_ref());
                    }
                }
                ChainOutcome::Faulted(fault)
            }
        }
    }

    async fn invoke(&self, ctx: &InvocationContext) -> Result<Value, HandlerFault> {
        let handler = Arc::clone(ctx.descriptor().handler());
        let call = AssertUnwindSafe(handler.handle(ctx)).catch_unwind();

        match tokio::time::timeout(self.handler_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                error!(
                    target_name = ctx.target(),
                    method = ctx.method(),
                    panic = %message,
                    "handler panicked"
                );
                Err(HandlerFault::Panicked { message })
            }
            Err(_elapsed) => {
                warn!(
                    target_name = ctx.target(),
                    method = ctx.method(),
                    timeout_secs = self.handler_timeout.as_secs_f64(),
                    "handler timed out"
                );
                Err(HandlerFault::Timeout {
                    timeout: self.handler_timeout,
                })
            }
        }
    }
}

impl Default for InterceptorChain {
    fn default() -> Self {
        Self::new(DEFAULT_HANDLER_TIMEOUT)
    }
}

fn hook_panicked(ctx: &InvocationContext, interceptor: &str, phase: &str, payload: &(dyn Any + Send)) {
    error!(
        target_name = ctx.target(),
        method = ctx.method(),
        interceptor,
        phase,
        panic = %panic_message(payload),
        "interceptor hook panicked, skipping"
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
