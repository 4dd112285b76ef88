/// Restic CSI - 公共库
///
/// 提供 Agent 与编排端共享的类型、错误处理、请求校验等

pub mod errors;
pub mod models;
pub mod utils;
pub mod ws_rpc;

// 重新导出常用类型
pub use errors::{Error, Result};
pub use models::{BackupTimestamp, ByteSize, PublishPhase};
pub use ws_rpc::{RpcMessage, RpcError, RpcErrorCode, MessageType};
