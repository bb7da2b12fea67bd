//! Invocation rate limit settings.

use serde::{Deserialize, Serialize};

/// Fixed-window limit applied per connection and method.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitSettings {
    /// Invocations allowed per window.
    pub max_invocations: usize,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_invocations: 10,
            window_ms: 1_000,
        }
    }
}
