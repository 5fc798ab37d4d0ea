//! Messages exchanged between connections, the manager and rooms.

use std::sync::Arc;

use super::{DisplayName, RoomId, UserId};

/// What a client asks the manager to do with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Broadcast,
    CreateRoom,
    JoinRoom,
    LeaveRoom,
    LeaveAll,
}

/// Identity of the sender, always taken from the connection, never the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub name: DisplayName,
}

/// A decoded inbound message, stamped with the connection's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub room_id: Option<RoomId>,
    pub from: Identity,
    pub body: Option<String>,
}

impl Envelope {
    pub fn new(
        kind: EnvelopeKind,
        room_id: Option<RoomId>,
        from: Identity,
        body: Option<String>,
    ) -> Self {
        Self {
            kind,
            room_id,
            from,
            body,
        }
    }
}

/// A serialized frame waiting in a connection's outbound queue.
///
/// Rooms clone the same frame into every member queue, so it is shared.
pub type OutboundFrame = Arc<str>;

/// Why a membership ended while the connection stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// The client asked to leave.
    Left,
    /// The room dropped the member because its outbound queue was full or
    /// closed.
    ///
    /// The `left` notice for an eviction goes into that same queue without
    /// waiting, so it only arrives if the queue has drained by the time the
    /// manager handles the eviction. Clients must not rely on receiving it.
    Evicted,
}

/// Server-to-client notifications, before serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Message {
        room_id: RoomId,
        from: Identity,
        body: String,
    },
    Joined {
        room_id: RoomId,
        room_name: String,
    },
    Left {
        room_id: RoomId,
        reason: LeaveReason,
    },
    Rejected {
        room_id: Option<RoomId>,
        reason: String,
    },
}
