//! # hubwire-server
//!
//! Hub-style RPC over WebSocket.
//!
//! - Method registry keyed by (target, method), with optional typed signatures
//! - Per-method interceptor chains (veto, result rewrite, fault observation)
//! - Connection table and push gateway (one, group, all, all-but-one)
//! - Axum server: `/ws`, `/health`, `/metrics`, graceful shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod rpc;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::HubServer;
