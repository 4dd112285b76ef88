/// 配置管理
///
/// 进程参数来自环境变量；卷与备份仓库配置来自 TOML 文件，
/// 其中 `secret:<key>` 形式的值在加载时替换为密钥文件中的对应项

use common::models::constants;
use common::{ByteSize, Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::lvm::ThinPool;
use crate::repository::Destination;

const SECRET_PREFIX: &str = "secret:";

/// 已存在的卷在发布时是否也从备份恢复
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePolicy {
    /// 只在卷首次创建时恢复
    #[default]
    OnCreate,
    /// 每次发布都恢复
    Always,
}

fn default_volume_size() -> ByteSize {
    constants::DEFAULT_VOLUME_SIZE
}

fn default_volume_command_timeout() -> u64 {
    constants::DEFAULT_VOLUME_COMMAND_TIMEOUT
}

fn default_repository_command_timeout() -> u64 {
    constants::DEFAULT_REPOSITORY_COMMAND_TIMEOUT
}

/// `[volume_info]` 段
#[derive(Debug, Clone, Deserialize)]
pub struct VolumeInfo {
    pub staging_path: PathBuf,
    pub thin_pool_name: String,
    #[serde(default = "default_volume_size")]
    pub default_volume_size: ByteSize,
    #[serde(default)]
    pub restore_policy: RestorePolicy,
    #[serde(default = "default_volume_command_timeout")]
    pub volume_command_timeout_secs: u64,
    #[serde(default = "default_repository_command_timeout")]
    pub repository_command_timeout_secs: u64,
}

impl VolumeInfo {
    pub fn volume_command_timeout(&self) -> Duration {
        Duration::from_secs(self.volume_command_timeout_secs)
    }

    pub fn repository_command_timeout(&self) -> Duration {
        Duration::from_secs(self.repository_command_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.staging_path.as_os_str().is_empty() || !self.staging_path.is_absolute() {
            return Err(Error::Config(format!(
                "staging_path must be an absolute path, got {:?}",
                self.staging_path
            )));
        }
        ThinPool::parse(&self.thin_pool_name)?;
        if self.default_volume_size.as_i64() <= 0 {
            return Err(Error::Config("default_volume_size must be positive".to_string()));
        }
        if self.volume_command_timeout_secs == 0 || self.repository_command_timeout_secs == 0 {
            return Err(Error::Config("command timeouts must be positive".to_string()));
        }
        Ok(())
    }
}

/// `[[restic_repo]]` 列表；单独解析以保留环境变量名的大小写
#[derive(Debug, Deserialize)]
struct DestinationList {
    #[serde(default)]
    restic_repo: Vec<Destination>,
}

/// 配置文件内容
#[derive(Debug, Clone)]
pub struct FileConfig {
    pub volume_info: VolumeInfo,
    /// 按配置顺序排列
    pub destinations: Vec<Destination>,
}

impl FileConfig {
    /// 加载配置文件与密钥文件
    pub fn load(config_file: &Path, secret_file: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(config_file).map_err(|e| {
            Error::Config(format!("Failed to read config file {:?}: {}", config_file, e))
        })?;

        let settings = ::config::Config::builder()
            .add_source(::config::File::from_str(&text, ::config::FileFormat::Toml))
            .add_source(
                ::config::Environment::with_prefix("CSI")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(format!("Failed to parse {:?}: {}", config_file, e)))?;

        let volume_info: VolumeInfo = settings
            .get("volume_info")
            .map_err(|e| Error::Config(format!("Invalid [volume_info] section: {}", e)))?;
        volume_info.validate()?;

        let DestinationList { restic_repo } = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("Invalid [[restic_repo]] entries: {}", e)))?;
        let destinations = resolve_secrets(restic_repo, secret_file)?;

        if destinations.is_empty() {
            warn!("No backup destinations configured, volumes will be neither restored nor backed up");
        }

        Ok(Self {
            volume_info,
            destinations,
        })
    }
}

fn references_secret(destinations: &[Destination]) -> bool {
    destinations
        .iter()
        .flat_map(|d| d.environment.values())
        .any(|value| value.starts_with(SECRET_PREFIX))
}

/// 把 `secret:<key>` 替换为密钥文件中的值，只在加载时执行一次
fn resolve_secrets(mut destinations: Vec<Destination>, secret_file: &Path) -> Result<Vec<Destination>> {
    if !references_secret(&destinations) {
        return Ok(destinations);
    }

    let text = std::fs::read_to_string(secret_file).map_err(|e| {
        Error::Config(format!("Failed to read secret file {:?}: {}", secret_file, e))
    })?;
    let secrets: HashMap<String, String> = toml::from_str(&text)
        .map_err(|e| Error::Config(format!("Invalid secret file {:?}: {}", secret_file, e)))?;

    for destination in destinations.iter_mut() {
        for (key, value) in destination.environment.iter_mut() {
            let Some(name) = value.strip_prefix(SECRET_PREFIX) else {
                continue;
            };
            let secret = secrets.get(name).ok_or_else(|| {
                Error::Config(format!(
                    "{} of {} references unknown secret {}",
                    key, destination.repository, name
                ))
            })?;
            *value = secret.clone();
        }
    }

    Ok(destinations)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node_id: String,
    pub hostname: String,
    pub server_ws_url: String,
    pub config_file: PathBuf,
    pub secret_file: PathBuf,
    pub volume_info: VolumeInfo,
    pub destinations: Vec<Destination>,
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> anyhow::Result<Self> {
        let node_id = std::env::var("NODE_ID")
            .ok()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("NODE_ID must be set"))?;

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let server_ws_url = std::env::var("SERVER_WS_URL")
            .unwrap_or_else(|_| "ws://localhost:3000/ws/csi".to_string());

        let config_file = PathBuf::from(
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "/local/config.toml".to_string()),
        );
        let secret_file = PathBuf::from(
            std::env::var("SECRET_FILE").unwrap_or_else(|_| "/secrets/secret.toml".to_string()),
        );

        let FileConfig {
            volume_info,
            destinations,
        } = FileConfig::load(&config_file, &secret_file)?;

        Ok(Self {
            node_id,
            hostname,
            server_ws_url,
            config_file,
            secret_file,
            volume_info,
            destinations,
        })
    }
}
