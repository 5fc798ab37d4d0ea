//! WebSocket and HTTP surface of the room engine.

pub mod connection;
mod handler;
mod server;
mod signal;
pub mod state;

pub use server::Server;
