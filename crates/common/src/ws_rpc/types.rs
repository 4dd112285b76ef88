/// WebSocket RPC 数据类型定义
///
/// 对应 CSI Node 服务中 publish / unpublish 的请求与响应

use serde::{Deserialize, Serialize};

/// 方法名
pub mod methods {
    pub const REGISTER: &str = "register";
    pub const NODE_PUBLISH_VOLUME: &str = "node_publish_volume";
    pub const NODE_UNPUBLISH_VOLUME: &str = "node_unpublish_volume";
}

// ============================================================================
// 注册
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub node_id: String,
    pub hostname: String,
    pub driver_name: String,
}

// ============================================================================
// 卷发布
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    pub volume_id: String,
    pub target_path: String,
    /// 请求的容量（字节），缺省时使用配置的默认大小
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_bytes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePublishVolumeResponse {
    pub volume_id: String,
    pub target_path: String,
    pub size_bytes: i64,
    pub created: bool,
    /// 用于初始化卷的快照（仓库 + 快照 ID），未恢复时为空
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<RestoredSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestoredSnapshot {
    pub repository: String,
    pub snapshot_id: String,
    pub time: String,
}

// ============================================================================
// 卷撤销发布
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeUnpublishVolumeRequest {
    pub volume_id: String,
    pub target_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeUnpublishVolumeResponse {
    pub volume_id: String,
    /// 本次所有目的地共享的备份时间
    pub backup_time: String,
    pub backups: Vec<DestinationBackupStatus>,
    /// 部分目的地备份失败时的告警，不影响调用成功
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestinationBackupStatus {
    pub repository: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
