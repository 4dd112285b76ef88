/// RPC 请求处理器
///
/// 把编排端的 publish / unpublish 请求分发给卷发布控制器

use common::ws_rpc::types::*;
use common::ws_rpc::{RpcError, RpcErrorCode, RpcMessage};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::publish::{PublishOutcome, PublishUnpublishController, UnpublishOutcome};

/// RPC 处理器注册表
pub struct RpcHandlerRegistry {
    controller: Arc<PublishUnpublishController>,
}

impl RpcHandlerRegistry {
    pub fn new(controller: Arc<PublishUnpublishController>) -> Self {
        Self { controller }
    }

    /// 处理 RPC 请求
    pub async fn handle_request(&self, msg: RpcMessage) -> RpcMessage {
        let method = match &msg.method {
            Some(m) => m.clone(),
            None => {
                return RpcMessage::from_rpc_error(msg.id, &RpcError::invalid_request("缺少方法名"));
            }
        };

        let payload = msg.payload.unwrap_or(serde_json::Value::Null);

        debug!("处理 RPC 请求: method={}, id={}", method, msg.id);

        let result = match method.as_str() {
            methods::NODE_PUBLISH_VOLUME => self.handle_publish_volume(payload).await,
            methods::NODE_UNPUBLISH_VOLUME => self.handle_unpublish_volume(payload).await,
            _ => Err(RpcError::method_not_found(&method)),
        };

        match result {
            Ok(response_payload) => RpcMessage::response(msg.id, response_payload),
            Err(err) => {
                if err.code != RpcErrorCode::MethodNotFound {
                    error!("RPC 请求失败: method={}, error={}", method, err);
                }
                RpcMessage::from_rpc_error(msg.id, &err)
            }
        }
    }

    async fn handle_publish_volume(&self, payload: serde_json::Value) -> Result<serde_json::Value, RpcError> {
        let req: NodePublishVolumeRequest = serde_json::from_value(payload)
            .map_err(|e| RpcError::invalid_params(format!("参数错误: {}", e)))?;

        info!("发布卷: {} -> {}", req.volume_id, req.target_path);

        let PublishOutcome {
            volume,
            created,
            restored_from,
        } = self
            .controller
            .publish(&req.volume_id, &req.target_path, req.capacity_bytes)
            .await?;

        let response = NodePublishVolumeResponse {
            volume_id: req.volume_id,
            target_path: req.target_path,
            size_bytes: volume.size.as_i64(),
            created,
            restored_from: restored_from.map(|source| RestoredSnapshot {
                repository: source.destination.repository,
                snapshot_id: source.snapshot.id,
                time: source.snapshot.time.to_rfc3339(),
            }),
        };

        Ok(serde_json::to_value(&response)?)
    }

    async fn handle_unpublish_volume(&self, payload: serde_json::Value) -> Result<serde_json::Value, RpcError> {
        let req: NodeUnpublishVolumeRequest = serde_json::from_value(payload)
            .map_err(|e| RpcError::invalid_params(format!("参数错误: {}", e)))?;

        info!("撤销发布卷: {} (target: {})", req.volume_id, req.target_path);

        let outcome: UnpublishOutcome = self
            .controller
            .unpublish(&req.volume_id, &req.target_path)
            .await?;

        let warnings = outcome.warnings();
        if !warnings.is_empty() {
            warn!("卷 {} 部分备份失败: {:?}", req.volume_id, warnings);
        }

        let response = NodeUnpublishVolumeResponse {
            volume_id: req.volume_id,
            backup_time: outcome.timestamp().to_string(),
            backups: outcome
                .report
                .results
                .into_iter()
                .map(|result| DestinationBackupStatus {
                    success: result.succeeded(),
                    repository: result.repository,
                    error: result.error,
                })
                .collect(),
            warnings,
        };

        Ok(serde_json::to_value(&response)?)
    }
}
