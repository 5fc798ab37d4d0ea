//! Conversion logic between DTOs and domain types.

use thiserror::Error;

use rooms_shared::time::timestamp_to_jst_rfc3339;

use crate::domain::{
    Envelope, EnvelopeKind, Identity, LeaveReason, Notice, OutboundFrame, RoomId,
    ValueObjectError,
};
use crate::engine::{GraphSnapshot, RoomSnapshot};
use crate::infrastructure::dto::{http, websocket as dto};

/// Inbound frame could not be turned into an envelope
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid room_id: {0}")]
    InvalidRoomId(#[from] ValueObjectError),
}

// ========================================
// DTO → Domain
// ========================================

impl From<dto::EnvelopeKindDto> for EnvelopeKind {
    fn from(kind: dto::EnvelopeKindDto) -> Self {
        match kind {
            dto::EnvelopeKindDto::Broadcast => Self::Broadcast,
            dto::EnvelopeKindDto::CreateRoom => Self::CreateRoom,
            dto::EnvelopeKindDto::JoinRoom => Self::JoinRoom,
            dto::EnvelopeKindDto::LeaveRoom => Self::LeaveRoom,
            dto::EnvelopeKindDto::LeaveAll => Self::LeaveAll,
        }
    }
}

impl dto::ClientEnvelope {
    /// Build the domain envelope, stamping `from` with the connection's identity.
    pub fn into_envelope(self, from: Identity) -> Result<Envelope, DecodeError> {
        let room_id = self.room_id.map(RoomId::new).transpose()?;
        Ok(Envelope::new(self.kind.into(), room_id, from, self.body))
    }
}

/// Decode one inbound JSON frame.
pub fn decode_envelope(bytes: &[u8], from: Identity) -> Result<Envelope, DecodeError> {
    let envelope: dto::ClientEnvelope = serde_json::from_slice(bytes)?;
    envelope.into_envelope(from)
}

// ========================================
// Domain → DTO
// ========================================

impl From<LeaveReason> for dto::LeaveReasonDto {
    fn from(reason: LeaveReason) -> Self {
        match reason {
            LeaveReason::Left => Self::Left,
            LeaveReason::Evicted => Self::Evicted,
        }
    }
}

/// Serialize a notice into the frame that goes on the outbound queue.
pub fn encode_notice(notice: &Notice) -> Result<OutboundFrame, serde_json::Error> {
    let json = match notice {
        Notice::Message {
            room_id,
            from,
            body,
        } => serde_json::to_string(&dto::RoomMessage {
            r#type: dto::MessageType::Message,
            room_id: room_id.as_str().to_string(),
            from: from.user_id.as_str().to_string(),
            from_name: from.name.as_str().to_string(),
            body: body.clone(),
        })?,
        Notice::Joined { room_id, room_name } => serde_json::to_string(&dto::JoinedMessage {
            r#type: dto::MessageType::Joined,
            room_id: room_id.as_str().to_string(),
            room_name: room_name.clone(),
        })?,
        Notice::Left { room_id, reason } => serde_json::to_string(&dto::LeftMessage {
            r#type: dto::MessageType::Left,
            room_id: room_id.as_str().to_string(),
            reason: (*reason).into(),
        })?,
        Notice::Rejected { room_id, reason } => serde_json::to_string(&dto::RejectedMessage {
            r#type: dto::MessageType::Rejected,
            room_id: room_id.as_ref().map(|id| id.as_str().to_string()),
            reason: reason.clone(),
        })?,
    };
    Ok(OutboundFrame::from(json))
}

fn rfc3339(timestamp_millis: i64) -> String {
    timestamp_to_jst_rfc3339(timestamp_millis).unwrap_or_default()
}

impl From<&RoomSnapshot> for http::RoomSummaryDto {
    fn from(room: &RoomSnapshot) -> Self {
        Self {
            id: room.id.as_str().to_string(),
            name: room.name.as_str().to_string(),
            is_default: room.is_default,
            members: room
                .members
                .iter()
                .map(|user_id| user_id.as_str().to_string())
                .collect(),
            created_at: rfc3339(room.created_at),
        }
    }
}

/// Room detail with member names and connection times, if the room exists.
pub fn room_detail(snapshot: &GraphSnapshot, room_id: &str) -> Option<http::RoomDetailDto> {
    let room = snapshot.rooms.iter().find(|room| room.id.as_str() == room_id)?;
    let members = room
        .members
        .iter()
        .filter_map(|user_id| snapshot.connection(user_id))
        .map(|connection| http::MemberDetailDto {
            user_id: connection.user_id.as_str().to_string(),
            name: connection.name.as_str().to_string(),
            connected_at: rfc3339(connection.connected_at),
        })
        .collect();

    Some(http::RoomDetailDto {
        id: room.id.as_str().to_string(),
        name: room.name.as_str().to_string(),
        is_default: room.is_default,
        members,
        created_at: rfc3339(room.created_at),
    })
}
