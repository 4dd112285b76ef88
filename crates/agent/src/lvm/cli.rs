/// LVM 卷后端
///
/// 通过 lvs / lvcreate / lvextend / lvremove / mkfs.xfs / findmnt / mount
/// 等命令管理精简池中的逻辑卷

use async_trait::async_trait;
use common::{ByteSize, Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use super::driver::{ThinPool, Volume, VolumeBackend};
use crate::command::{combined_output, CommandRunner, CommandSpec};

const LVS: &str = "/usr/sbin/lvs";
const LVCREATE: &str = "/usr/sbin/lvcreate";
const LVEXTEND: &str = "/usr/sbin/lvextend";
const LVREMOVE: &str = "/usr/sbin/lvremove";
const MKFS_XFS: &str = "/usr/sbin/mkfs.xfs";
const FINDMNT: &str = "/usr/bin/findmnt";
const MOUNT: &str = "/usr/bin/mount";
const UMOUNT: &str = "/usr/bin/umount";
const CP: &str = "/usr/bin/cp";

/// lvs --reportformat json 输出
#[derive(Debug, Deserialize)]
struct LvsReport {
    report: Vec<LvsSection>,
}

#[derive(Debug, Deserialize)]
struct LvsSection {
    #[serde(default)]
    lv: Vec<Volume>,
}

/// LVM 卷后端
pub struct LvmCliBackend {
    runner: CommandRunner,
}

impl LvmCliBackend {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    /// 解析 lvs JSON 报告
    fn parse_lvs_report(stdout: &[u8]) -> Result<Vec<Volume>> {
        let report: LvsReport = serde_json::from_slice(stdout)?;
        Ok(report
            .report
            .into_iter()
            .next()
            .map(|section| section.lv)
            .unwrap_or_default())
    }

    /// 解析 findmnt 输出，取第一个挂载点
    fn parse_findmnt_target(stdout: &[u8]) -> Option<PathBuf> {
        String::from_utf8_lossy(stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(PathBuf::from)
    }
}

#[async_trait]
impl VolumeBackend for LvmCliBackend {
    async fn pool_is_thin(&self, pool: &ThinPool) -> Result<bool> {
        let spec = CommandSpec::new(LVS)
            .arg(pool.long_name())
            .args(["--noheadings", "-o", "lv_attr"]);

        let output = self.runner.output(&spec).await?;
        if !output.status.success() {
            debug!("lvs reported no pool {}: {}", pool, combined_output(&output));
            return Ok(false);
        }

        let attr = String::from_utf8_lossy(&output.stdout);
        Ok(attr.trim().starts_with('t'))
    }

    async fn list_volumes(&self, pool: &ThinPool) -> Result<Vec<Volume>> {
        let spec = CommandSpec::new(LVS)
            .args(["--units", "B", "--select"])
            .arg(format!("pool_lv={}&&vg_name={}", pool.name, pool.vg_name))
            .args(["--reportformat", "json", "-o", "lv_name,vg_name,lv_attr,lv_size"]);

        let output = self.runner.run(&spec).await?;
        let mut volumes = Self::parse_lvs_report(&output.stdout)?;

        for volume in volumes.iter_mut() {
            let target = self.query_mount(&volume.device_path()).await?;
            volume.apply_mount_state(target);
        }

        debug!("Pool {} holds {} volumes", pool, volumes.len());
        Ok(volumes)
    }

    async fn create_volume(&self, pool: &ThinPool, name: &str, size: ByteSize) -> Result<()> {
        info!("Creating thin volume {} in {} ({})", name, pool, size);

        let create = CommandSpec::new(LVCREATE)
            .args(["-V", size.as_arg().as_str(), "-T", pool.lv_path().as_str(), "-n", name]);
        self.runner.run(&create).await?;

        let device = pool.device_path(name);
        let mkfs = CommandSpec::new(MKFS_XFS).path_arg(&device);
        self.runner.run(&mkfs).await?;

        info!("Created and formatted {:?}", device);
        Ok(())
    }

    async fn extend_volume(&self, pool: &ThinPool, name: &str, size: ByteSize) -> Result<()> {
        info!("Extending volume {} in {} to {}", name, pool, size);

        let spec = CommandSpec::new(LVEXTEND)
            .args(["--size", size.as_arg().as_str(), "--resizefs"])
            .path_arg(&pool.device_path(name));
        self.runner.run(&spec).await?;
        Ok(())
    }

    async fn remove_volume(&self, pool: &ThinPool, name: &str) -> Result<()> {
        info!("Removing volume {} from {}", name, pool);

        let spec = CommandSpec::new(LVREMOVE)
            .arg("-f")
            .path_arg(&pool.device_path(name));
        self.runner.run(&spec).await?;
        Ok(())
    }

    async fn query_mount(&self, device: &Path) -> Result<Option<PathBuf>> {
        let spec = CommandSpec::new(FINDMNT)
            .args(["-n", "-o", "TARGET", "--source"])
            .path_arg(device);

        let output = self.runner.output(&spec).await?;
        match output.status.code() {
            Some(0) => Ok(Self::parse_findmnt_target(&output.stdout)),
            // findmnt 以 1 退出表示没有匹配的挂载
            Some(1) => Ok(None),
            status => Err(Error::backend(spec.display(), status, combined_output(&output))),
        }
    }

    async fn mount(&self, device: &Path, target: &Path) -> Result<()> {
        fs::create_dir_all(target).await.map_err(|e| {
            Error::Storage(format!("Failed to create mount point {:?}: {}", target, e))
        })?;

        let spec = CommandSpec::new(MOUNT).path_arg(device).path_arg(target);
        self.runner.run(&spec).await?;

        info!("Mounted {:?} at {:?}", device, target);
        Ok(())
    }

    async fn unmount(&self, device: &Path) -> Result<()> {
        let spec = CommandSpec::new(UMOUNT).path_arg(device);
        self.runner.run(&spec).await?;

        info!("Unmounted {:?}", device);
        Ok(())
    }

    async fn copy_tree(&self, source: &Path, destination: &Path) -> Result<()> {
        info!("Copying tree {:?} -> {:?}", source, destination);

        // `src/.` 复制目录内容而非目录本身
        let spec = CommandSpec::new(CP)
            .arg("-a")
            .path_arg(&source.join("."))
            .arg(format!("{}/", destination.display()));
        self.runner.run(&spec).await?;
        Ok(())
    }

    fn backend_type(&self) -> &str {
        "lvm"
    }
}
