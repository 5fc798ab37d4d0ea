//! Membership events handed to the persistence collaborator.

use async_trait::async_trait;

use super::{RoomId, RoomName, UserId};

/// Best-effort notification about room and membership changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    RoomCreated { room_id: RoomId, name: RoomName },
    MemberJoined { room_id: RoomId, user_id: UserId },
    MemberLeft { room_id: RoomId, user_id: UserId },
}

/// Sink for membership events (e.g. a database writer).
///
/// Publishing is fire-and-forget: implementations log their own failures,
/// and the engine never waits for them on its routing path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: MembershipEvent);
}
