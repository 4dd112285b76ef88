/// 共享数据模型
///
/// 定义 Agent 与编排端共享的数据结构

use chrono::{DateTime, SubsecRound, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 字节数（有符号 64 位），lvs 以 "1073741824B" 形式报告
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteSize(pub i64);

impl ByteSize {
    pub const fn bytes(n: i64) -> Self {
        Self(n)
    }

    pub const fn gib(n: i64) -> Self {
        Self(n * 1024 * 1024 * 1024)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// 传给 lvm 工具的参数形式
    pub fn as_arg(&self) -> String {
        format!("{}B", self.0)
    }

    /// 解析 "1024B" 或 "1024"
    pub fn parse(s: &str) -> Option<Self> {
        let trimmed = s.trim().trim_matches('"');
        let digits = trimmed.strip_suffix('B').unwrap_or(trimmed);
        digits.parse::<i64>().ok().map(Self)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.0)
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ByteSizeVisitor;

        impl<'de> de::Visitor<'de> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte count as integer or \"<n>B\" string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<ByteSize, E> {
                Ok(ByteSize(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<ByteSize, E> {
                i64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom(format!("byte size {} overflows i64", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ByteSize, E> {
                ByteSize::parse(v).ok_or_else(|| E::custom(format!("invalid byte size: {}", v)))
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

/// 一次 unpublish 操作共享的备份时间点
///
/// 在操作开始时捕获一次，所有目的地使用同一个值。精度截断到秒，
/// 以便 restic `--time` 参数能够无损表达。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BackupTimestamp(DateTime<Utc>);

impl BackupTimestamp {
    pub fn capture() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        Self(time.trunc_subsecs(0))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// restic backup --time 接受的格式
    pub fn as_restic_time(&self) -> String {
        self.0.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

impl fmt::Display for BackupTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// 卷发布状态机的阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PublishPhase {
    #[default]
    Idle,
    Presenting,
    Selecting,
    Restoring,
    FinalMounting,
    Published,
    StagingRemount,
    BackingUp,
    Unpublished,
    Failed,
}

impl PublishPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Presenting => "presenting",
            Self::Selecting => "selecting",
            Self::Restoring => "restoring",
            Self::FinalMounting => "final_mounting",
            Self::Published => "published",
            Self::StagingRemount => "staging_remount",
            Self::BackingUp => "backing_up",
            Self::Unpublished => "unpublished",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PublishPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 常量定义
pub mod constants {
    use super::ByteSize;

    /// 插件名称
    pub const DRIVER_NAME: &str = "restic.csi.nodeto.com";

    /// 未指定容量时创建卷的默认大小
    pub const DEFAULT_VOLUME_SIZE: ByteSize = ByteSize::gib(1);

    /// 卷管理命令默认超时（秒）
    pub const DEFAULT_VOLUME_COMMAND_TIMEOUT: u64 = 300;

    /// 备份仓库命令默认超时（秒）
    pub const DEFAULT_REPOSITORY_COMMAND_TIMEOUT: u64 = 6 * 60 * 60;

    /// 断线重连间隔（秒）
    pub const DEFAULT_RECONNECT_INTERVAL: u64 = 5;
}
