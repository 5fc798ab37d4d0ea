//! Engine configuration: deadlines, size limits and queue capacities.

use std::time::Duration;

use thiserror::Error;

use crate::domain::{RoomName, ValueObjectError};

/// Time allowed to write a frame to the peer.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);
/// Time allowed between two frames (data or pong) from the peer.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);
/// Maximum size in bytes of one inbound frame.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;
/// Frames buffered per connection before it counts as a slow consumer.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;
/// Commands buffered in front of the manager.
pub const DEFAULT_MANAGER_CAPACITY: usize = 1024;
/// Name of the room every connection joins on connect.
pub const DEFAULT_ROOM_NAME: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("ping period ({ping:?}) must be shorter than the pong wait ({pong:?})")]
    PingNotShorterThanPongWait { ping: Duration, pong: Duration },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("invalid default room name: {0}")]
    InvalidDefaultRoomName(#[from] ValueObjectError),
}

/// Tunables of the connection/room engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub write_wait: Duration,
    pub pong_wait: Duration,
    /// Keepalive period; must be strictly shorter than `pong_wait`.
    pub ping_period: Duration,
    pub max_message_size: usize,
    pub outbound_capacity: usize,
    pub manager_capacity: usize,
    pub default_room_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            write_wait: DEFAULT_WRITE_WAIT,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: DEFAULT_PONG_WAIT * 9 / 10,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            manager_capacity: DEFAULT_MANAGER_CAPACITY,
            default_room_name: DEFAULT_ROOM_NAME.to_string(),
        }
    }
}

impl EngineConfig {
    /// Derive the ping period from the pong wait the same way the defaults do.
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = pong_wait * 9 / 10;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_period >= self.pong_wait {
            return Err(ConfigError::PingNotShorterThanPongWait {
                ping: self.ping_period,
                pong: self.pong_wait,
            });
        }
        if self.ping_period.is_zero() {
            return Err(ConfigError::Zero("ping_period"));
        }
        if self.write_wait.is_zero() {
            return Err(ConfigError::Zero("write_wait"));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Zero("max_message_size"));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Zero("outbound_capacity"));
        }
        if self.manager_capacity == 0 {
            return Err(ConfigError::Zero("manager_capacity"));
        }
        RoomName::parse(&self.default_room_name)?;
        Ok(())
    }
}
