//! Connection/room multiplexing engine.
//!
//! - `manager`: owns the room registry and the membership graph, routes
//!   inbound envelopes
//! - `room`: one actor per room, fans frames out to member queues
//! - `session`: what an accepted connection carries into its pumps

pub mod manager;
pub mod room;
pub mod session;

pub use manager::{ConnectionSnapshot, GraphSnapshot, Manager, ManagerHandle, RoomSnapshot};
pub use session::Session;
