//! Built-in interceptors.

pub mod logging;
pub mod rate_limit;

pub use logging::InvocationLogger;
pub use rate_limit::RateLimiter;
