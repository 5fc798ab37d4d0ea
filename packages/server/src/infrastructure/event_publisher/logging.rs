//! EventPublisher that only logs.

use async_trait::async_trait;

use crate::domain::{EventPublisher, MembershipEvent};

/// Logs every membership event at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: MembershipEvent) {
        match event {
            MembershipEvent::RoomCreated { room_id, name } => {
                tracing::info!(room_id = %room_id, name = %name, "room created");
            }
            MembershipEvent::MemberJoined { room_id, user_id } => {
                tracing::info!(room_id = %room_id, user_id = %user_id, "member joined");
            }
            MembershipEvent::MemberLeft { room_id, user_id } => {
                tracing::info!(room_id = %room_id, user_id = %user_id, "member left");
            }
        }
    }
}
