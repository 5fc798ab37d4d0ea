//! Shared application state.

use std::sync::Arc;

use crate::{config::EngineConfig, engine::ManagerHandle};

/// Shared application state
pub struct AppState {
    /// Handle to the manager actor（ルーム管理アクターへのハンドル）
    pub manager: ManagerHandle,
    /// Connection timing and limits（接続のタイミングと上限）
    pub config: Arc<EngineConfig>,
}
