//! Data Transfer Objects (DTOs) for the rooms server.
//!
//! DTOs are organized by protocol:
//! - `websocket`: WebSocket envelope DTOs
//! - `http`: HTTP API response DTOs

pub mod conversion;
pub mod http;
pub mod websocket;
