/// WebSocket RPC 模块
///
/// 编排端与节点 Agent 之间基于 WebSocket 的 RPC 消息定义

pub mod message;
pub mod error;
pub mod types;

pub use message::{RpcMessage, MessageType};
pub use error::{RpcError, RpcErrorCode};
pub use types::*;
