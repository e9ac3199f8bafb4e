//! Real-time broadcast hub served over WebSockets.
//!
//! Clients connect to `/ws` and exchange JSON envelopes of the form
//! `{"event": "<name>", "data": {...}}`. The hub greets every newcomer with
//! its ordinal, announces joins and departures with the live total, echoes
//! chat messages back to their sender while relaying them to everyone else,
//! and pushes a random value to all clients once per second.
//!
//! - [`cli`] parses command-line flags into a [`server::ServerConfig`].
//! - [`protocol`] defines the event envelope and payloads.
//! - [`hub`] owns the connection registry and every fan-out rule.
//! - [`ticker`] runs the periodic update loop.
//! - [`server`] wires the hub into an axum router and per-socket sessions.

pub mod cli;
pub mod hub;
pub mod protocol;
pub mod server;
pub mod ticker;
