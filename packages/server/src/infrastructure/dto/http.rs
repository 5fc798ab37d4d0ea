//! HTTP API response DTOs.

use serde::{Deserialize, Serialize};

/// Room summary for list endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummaryDto {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    /// User ids of the current members
    pub members: Vec<String>,
    pub created_at: String,
}

/// Member detail for the room detail endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDetailDto {
    pub user_id: String,
    pub name: String,
    pub connected_at: String,
}

/// Room detail for detail endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomDetailDto {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub members: Vec<MemberDetailDto>,
    pub created_at: String,
}
