use thiserror::Error;

/// 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 请求字段缺失或格式错误，永不重试
    #[error("无效请求: {0}")]
    InvalidRequest(String),

    /// 外部命令（lvm / mount / restic）返回非零状态、无法启动或超时
    #[error("后端命令失败: `{command}` (status: {}): {output}", status_text(.status))]
    Backend {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("资源已存在: {0}")]
    AlreadyExists(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

fn status_text(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

impl Error {
    /// 构造后端命令失败
    pub fn backend(
        command: impl Into<String>,
        status: Option<i32>,
        output: impl Into<String>,
    ) -> Self {
        Self::Backend {
            command: command.into(),
            status,
            output: output.into(),
        }
    }

    /// 命令超时按后端失败处理
    pub fn backend_timeout(command: impl Into<String>, secs: u64) -> Self {
        Self::Backend {
            command: command.into(),
            status: None,
            output: format!("timed out after {}s", secs),
        }
    }

    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, Error>;
