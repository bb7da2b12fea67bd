//! Fixed-window rate limiter keyed by (connection, target, method).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::rpc::context::InvocationContext;
use crate::rpc::interceptor::Interceptor;
use crate::websocket::connection::ConnectionId;

/// Stale windows are pruned once every this many checks.
const PRUNE_EVERY_CHECKS: u64 = 512;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    connection: ConnectionId,
    target: String,
    method: String,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: usize,
}

/// Vetoes invocations once a caller exceeds `max_invocations` per window.
pub struct RateLimiter {
    max_invocations: usize,
    window: Duration,
    windows: DashMap<WindowKey, WindowState>,
    checks: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter allowing `max_invocations` per `window`.
    pub fn new(max_invocations: usize, window: Duration) -> Self {
        Self {
            max_invocations,
            window,
            windows: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    /// Record one call at `now` and decide whether it is allowed.
    pub fn check_at(
        &self,
        connection: &ConnectionId,
        target: &str,
        method: &str,
        now: Instant,
    ) -> bool {
        if self.max_invocations == 0 {
            return false;
        }
        let key = WindowKey {
            connection: connection.clone(),
            target: target.to_lowercase(),
            method: method.to_lowercase(),
        };
        let allowed = match self.windows.entry(key) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();
                if now.duration_since(state.started_at) >= self.window {
                    state.started_at = now;
                    state.count = 1;
                    true
                } else if state.count < self.max_invocations {
                    state.count += 1;
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                let _ = vacant.insert(WindowState {
                    started_at: now,
                    count: 1,
                });
                true
            }
        };

        let seen = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % PRUNE_EVERY_CHECKS == 0 {
            self.prune(now);
        }
        allowed
    }

    /// Drop windows that expired before `now`.
    pub fn prune(&self, now: Instant) {
        self.windows
            .retain(|_, state| now.duration_since(state.started_at) < self.window);
    }

    /// Number of tracked windows.
    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl Interceptor for RateLimiter {
    fn name(&self) -> &str {
        "RateLimiter"
    }

    async fn before_invoke(&self, ctx: &InvocationContext) -> bool {
        let allowed = self.check_at(ctx.connection_id(), ctx.target(), ctx.method(), Instant::now());
        if !allowed {
            debug!(
                conn_id = %ctx.connection_id(),
                target_name = ctx.target(),
                method = ctx.method(),
                max = self.max_invocations,
                "rate limit exceeded"
            );
        }
        allowed
    }
}
