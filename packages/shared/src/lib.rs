//! Utilities shared by the rooms server binary and its tests.

pub mod logger;
pub mod time;
