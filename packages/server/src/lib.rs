//! Multi-room chat server.
//!
//! Each WebSocket connection belongs to any number of named rooms. A single
//! manager actor owns the membership graph and routes inbound envelopes;
//! one actor per room fans frames out to member queues.

pub mod config;
pub mod domain;
pub mod engine;
pub mod infrastructure;
pub mod ui;
