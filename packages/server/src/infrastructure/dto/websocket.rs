//! WebSocket envelope DTOs.

use serde::{Deserialize, Serialize};

/// Kind of a client-to-server envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKindDto {
    Broadcast,
    CreateRoom,
    JoinRoom,
    LeaveRoom,
    LeaveAll,
}

/// Client-to-server envelope.
///
/// A `from` field sent by the client is accepted but never used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    pub kind: EnvelopeKindDto,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Discriminator of server-to-client messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Message,
    Joined,
    Left,
    Rejected,
}

/// A broadcast delivered to a room member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMessage {
    pub r#type: MessageType,
    pub room_id: String,
    /// User id of the sender, stamped by the server
    pub from: String,
    pub from_name: String,
    pub body: String,
}

/// Membership confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedMessage {
    pub r#type: MessageType,
    pub room_id: String,
    pub room_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaveReasonDto {
    Left,
    Evicted,
}

/// Membership ended while the connection stays open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeftMessage {
    pub r#type: MessageType,
    pub room_id: String,
    pub reason: LeaveReasonDto,
}

/// Diagnostic for a dropped request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedMessage {
    pub r#type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub reason: String,
}
