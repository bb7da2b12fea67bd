//! WebSocket connection management, push fan-out and session lifecycle.

pub mod connection;
pub mod gateway;
pub mod session;
pub mod table;
