/// 卷后端抽象层
///
/// 定义精简卷池 / 逻辑卷 / 挂载操作的统一接口，
/// 真实实现调用 lvm 与 mount 工具，测试中使用脚本化的替身

use async_trait::async_trait;
use common::{ByteSize, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// 精简卷池标识，例如 `/dev/vg0/thinpool`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThinPool {
    pub vg_name: String,
    pub name: String,
}

impl ThinPool {
    /// 从 `/dev/<vg>/<pool>` 形式的路径解析
    pub fn parse(long_name: &str) -> Result<Self> {
        let parts: Vec<&str> = long_name.split('/').collect();
        match parts.as_slice() {
            ["", "dev", vg, pool] if !vg.is_empty() && !pool.is_empty() => Ok(Self {
                vg_name: vg.to_string(),
                name: pool.to_string(),
            }),
            _ => Err(Error::Config(format!(
                "invalid thin pool path {}, expected /dev/<vg>/<pool>",
                long_name
            ))),
        }
    }

    pub fn long_name(&self) -> String {
        format!("/dev/{}/{}", self.vg_name, self.name)
    }

    /// lvcreate -T 需要的 `<vg>/<pool>` 形式
    pub fn lv_path(&self) -> String {
        format!("{}/{}", self.vg_name, self.name)
    }

    /// 池中某个卷的设备路径
    pub fn device_path(&self, volume_name: &str) -> PathBuf {
        PathBuf::from(format!("/dev/{}/{}", self.vg_name, volume_name))
    }
}

impl fmt::Display for ThinPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.long_name())
    }
}

/// 逻辑卷记录
///
/// 挂载标志与目标路径总是来自最近一次成功的挂载 / 卸载 / 状态刷新
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(rename = "lv_name")]
    pub name: String,
    pub vg_name: String,
    #[serde(rename = "lv_attr", default)]
    pub attr: String,
    #[serde(rename = "lv_size")]
    pub size: ByteSize,
    #[serde(default)]
    pub mounted: bool,
    #[serde(default)]
    pub target: Option<PathBuf>,
}

impl Volume {
    /// 设备路径，例如 `/dev/vg0/test-volume`
    pub fn device_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/{}/{}", self.vg_name, self.name))
    }

    pub fn is_mounted_at(&self, path: &Path) -> bool {
        self.mounted && self.target.as_deref() == Some(path)
    }

    pub(crate) fn apply_mount_state(&mut self, target: Option<PathBuf>) {
        self.mounted = target.is_some();
        self.target = target;
    }
}

/// 卷后端 Trait
#[async_trait]
pub trait VolumeBackend: Send + Sync + 'static {
    /// 检查池是否存在且为精简池
    async fn pool_is_thin(&self, pool: &ThinPool) -> Result<bool>;

    /// 列出池中所有卷（含挂载状态），整体替换内存镜像
    async fn list_volumes(&self, pool: &ThinPool) -> Result<Vec<Volume>>;

    /// 创建精简卷并格式化
    async fn create_volume(&self, pool: &ThinPool, name: &str, size: ByteSize) -> Result<()>;

    /// 原地扩容，从不缩小
    async fn extend_volume(&self, pool: &ThinPool, name: &str, size: ByteSize) -> Result<()>;

    /// 删除卷
    async fn remove_volume(&self, pool: &ThinPool, name: &str) -> Result<()>;

    /// 查询设备当前挂载点；`Ok(None)` 表示未挂载，查询失败返回错误
    async fn query_mount(&self, device: &Path) -> Result<Option<PathBuf>>;

    /// 挂载设备（必要时创建挂载点目录）
    async fn mount(&self, device: &Path, target: &Path) -> Result<()>;

    /// 卸载设备
    async fn unmount(&self, device: &Path) -> Result<()>;

    /// 保留属性与属主的目录树复制，覆盖目标中的同名文件
    async fn copy_tree(&self, source: &Path, destination: &Path) -> Result<()>;

    /// 获取后端类型
    fn backend_type(&self) -> &str;
}
