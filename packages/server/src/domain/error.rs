//! Error types of the rooms domain.

use thiserror::Error;

use super::{RoomId, UserId};

/// Value object validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{field} must be at most {max} characters (got {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },
}

/// Reasons a new connection is refused before any pump starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The identity already holds a live connection; the old one is kept.
    #[error("user '{0}' is already connected")]
    DuplicateUser(UserId),

    /// The manager task is gone (shutdown in progress).
    #[error("room engine is not running")]
    EngineUnavailable,
}

/// Routing errors: the message is dropped, the sender stays connected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("message kind requires a room_id")]
    MissingRoomId,

    #[error("create-room requires a room name in body")]
    MissingRoomName,

    #[error("broadcast requires a body")]
    MissingBody,

    #[error("invalid room name: {0}")]
    InvalidRoomName(#[from] ValueObjectError),

    #[error("room '{0}' does not exist")]
    UnknownRoom(RoomId),

    #[error("not a member of room '{0}'")]
    NotAMember(RoomId),

    /// The default room is joined on connect only.
    #[error("room '{0}' can only be rejoined by reconnecting")]
    DefaultRoomRejoin(RoomId),
}

impl RouteError {
    /// Room the failed request referred to, if any.
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::UnknownRoom(room_id)
            | Self::NotAMember(room_id)
            | Self::DefaultRoomRejoin(room_id) => Some(room_id),
            _ => None,
        }
    }
}
