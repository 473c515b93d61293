//! msgrelay server library.
//!
//! Exposes the relay server for use in tests and embedding. The server
//! accepts WebSocket sessions bound to a receiver identity, persists every
//! inbound message, acknowledges messages addressed to the bound identity,
//! and serves persisted history over HTTP.

pub mod config;
pub mod history;
pub mod relay;
pub mod session;
pub mod store;
