/// WebSocket RPC 消息定义

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::RpcError;

/// RPC 消息类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// 请求消息（期望响应）
    Request,
    /// 响应消息
    Response,
    /// 通知消息（不需要响应）
    Notification,
}

/// RPC 消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMessage {
    /// 消息唯一ID
    pub id: String,
    
    /// 消息类型
    #[serde(rename = "type")]
    pub message_type: MessageType,
    
    /// RPC 方法名（request/notification 时必需）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    
    /// 消息负载
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    
    /// 错误信息（仅 response 时可能有值）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorInfo>,
}

/// RPC 错误信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorInfo {
    /// 错误码
    pub code: String,
    
    /// 错误消息
    pub message: String,
    
    /// 错误详情（可选）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl RpcMessage {
    /// 创建请求消息
    pub fn request(method: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: format!("req-{}", Uuid::new_v4()),
            message_type: MessageType::Request,
            method: Some(method.into()),
            payload: Some(payload),
            error: None,
        }
    }

    /// 创建响应消息
    pub fn response(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            message_type: MessageType::Response,
            method: None,
            payload: Some(payload),
            error: None,
        }
    }

    /// 创建错误响应消息
    pub fn error_response(
        id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            message_type: MessageType::Response,
            method: None,
            payload: None,
            error: Some(RpcErrorInfo {
                code: code.into(),
                message: message.into(),
                details,
            }),
        }
    }

    /// 由 RpcError 创建错误响应
    pub fn from_rpc_error(id: impl Into<String>, err: &RpcError) -> Self {
        Self::error_response(id, err.code.as_str(), err.message.clone(), err.details.clone())
    }

    /// 序列化为 JSON 字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 从 JSON 字符串反序列化
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// 判断是否是成功响应
    pub fn is_success(&self) -> bool {
        self.message_type == MessageType::Response && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_message() {
        let msg = RpcMessage::request("node_publish_volume", json!({"volume_id": "pg-data"}));
        assert_eq!(msg.message_type, MessageType::Request);
        assert_eq!(msg.method.as_deref(), Some("node_publish_volume"));
        assert!(msg.id.starts_with("req-"));
    }

    #[test]
    fn test_response_message() {
        let msg = RpcMessage::response("req-123", json!({"volume_id": "pg-data"}));
        assert_eq!(msg.message_type, MessageType::Response);
        assert_eq!(msg.id, "req-123");
        assert!(msg.is_success());
    }

    #[test]
    fn test_error_response() {
        let msg = RpcMessage::error_response(
            "req-123",
            "OPERATION_FAILED",
            "mount failed",
            None,
        );
        assert!(!msg.is_success());
        assert_eq!(msg.error.as_ref().unwrap().code, "OPERATION_FAILED");
    }

    #[test]
    fn test_error_response_from_rpc_error() {
        let err = RpcError::invalid_params("target path must be provided");
        let msg = RpcMessage::from_rpc_error("req-9", &err);
        assert!(!msg.is_success());
        assert_eq!(msg.id, "req-9");
        assert_eq!(msg.error.as_ref().unwrap().code, "INVALID_PARAMS");
    }

    #[test]
    fn test_wire_type_field() {
        let msg = RpcMessage::request("node_publish_volume", json!({"volume_id": "a"}));
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "request");
        assert!(value.get("error").is_none());
    }
}

