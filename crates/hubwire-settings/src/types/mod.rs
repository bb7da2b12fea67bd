//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON files are accepted and missing fields keep their default value.

mod logging;
mod rate_limit;
mod server;

pub use logging::*;
pub use rate_limit::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the hub server.
///
/// ```json
/// {
///   "server": { "port": 9400 },
///   "logging": { "level": "debug", "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Network and connection settings.
    pub server: ServerSettings,
    /// Log level and output format.
    pub logging: LoggingSettings,
    /// Per-connection invocation rate limit applied by the rate limiter interceptor.
    pub rate_limit: RateLimitSettings,
}

impl HubSettings {
    /// Reject combinations that would make the server misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.server.heartbeat_timeout_secs < self.server.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeatTimeoutSecs ({}) must be >= heartbeatIntervalSecs ({})",
                self.server.heartbeat_timeout_secs, self.server.heartbeat_interval_secs
            )));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "sendQueueCapacity must be at least 1".into(),
            ));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "rateLimit.windowMs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
