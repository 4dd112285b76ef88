/// 备份仓库抽象层
///
/// 每个目的地（远端备份仓库）都通过同一个后端访问，调用时携带该目的地的凭据

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BackupTimestamp, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// 备份目的地：仓库地址 + 已解析的环境变量 / 凭据
///
/// 配置加载后不可变
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(rename = "repo")]
    pub repository: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

impl Destination {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            environment: HashMap::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

// 凭据不进日志
impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.environment.keys().collect();
        keys.sort();
        f.debug_struct("Destination")
            .field("repository", &self.repository)
            .field("environment_keys", &keys)
            .finish()
    }
}

/// 快照描述：来自哪个仓库、代表的时间点、可用于挂载的句柄
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDescriptor {
    pub repository: String,
    pub id: String,
    pub short_id: String,
    pub time: DateTime<Utc>,
    /// 备份时的源路径
    #[serde(default)]
    pub paths: Vec<String>,
}

impl SnapshotDescriptor {
    /// 与目标时间的绝对距离（毫秒）
    pub fn distance_to(&self, target: DateTime<Utc>) -> i64 {
        (self.time - target).num_milliseconds().abs()
    }
}

/// 备份仓库后端 Trait
#[async_trait]
pub trait RepositoryBackend: Send + Sync + 'static {
    /// 查找与 `time` 最接近的快照；仓库中没有该卷的快照时返回 `Ok(None)`
    async fn find_nearest(
        &self,
        destination: &Destination,
        volume: &str,
        time: DateTime<Utc>,
    ) -> Result<Option<SnapshotDescriptor>>;

    /// 只读挂载快照，返回挂载内快照内容所在目录
    async fn mount_snapshot(
        &self,
        destination: &Destination,
        snapshot: &SnapshotDescriptor,
        mount_point: &Path,
    ) -> Result<PathBuf>;

    /// 卸载快照
    async fn unmount_snapshot(&self, destination: &Destination, mount_point: &Path) -> Result<()>;

    /// 以指定时间点备份卷内容
    async fn backup(
        &self,
        destination: &Destination,
        volume: &str,
        source: &Path,
        timestamp: BackupTimestamp,
    ) -> Result<()>;

    /// 获取后端类型
    fn backend_type(&self) -> &str;
}
