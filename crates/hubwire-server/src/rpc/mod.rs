//! Invocation pipeline: registry, interceptors, chain engine and dispatcher.

pub mod chain;
pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod interceptor;
pub mod interceptors;
pub mod registry;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
