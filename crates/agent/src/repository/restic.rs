/// restic 备份仓库后端
///
/// 快照以卷名打 tag、以节点 ID 作为 host；挂载通过常驻的 `restic mount`
/// 子进程提供只读 FUSE 视图

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BackupTimestamp, Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::driver::{Destination, RepositoryBackend, SnapshotDescriptor};
use crate::command::{CommandRunner, CommandSpec};

const RESTIC: &str = "restic";
const UMOUNT: &str = "/usr/bin/umount";

/// 等待 FUSE 挂载出现快照目录的轮询间隔
const MOUNT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// `restic snapshots --json` 中的单条记录
#[derive(Debug, Deserialize)]
struct ResticSnapshot {
    id: String,
    #[serde(default)]
    short_id: Option<String>,
    time: DateTime<Utc>,
    #[serde(default)]
    paths: Vec<String>,
}

/// restic 后端
pub struct ResticBackend {
    runner: CommandRunner,
    /// 写入快照的 host 字段
    host: String,
    /// 等待挂载就绪的上限
    mount_timeout: Duration,
    /// 挂载点 -> 常驻的 restic mount 进程
    mounts: Mutex<HashMap<PathBuf, Child>>,
}

impl ResticBackend {
    pub fn new(runner: CommandRunner, host: impl Into<String>) -> Self {
        Self {
            runner,
            host: host.into(),
            mount_timeout: Duration::from_secs(120),
            mounts: Mutex::new(HashMap::new()),
        }
    }

    fn command(&self, destination: &Destination) -> CommandSpec {
        CommandSpec::new(RESTIC)
            .envs(&destination.environment)
            .env("RESTIC_REPOSITORY", destination.repository.clone())
    }

    /// 从快照列表中选出离 `time` 最近的一个，距离相同取列表中靠前者
    fn nearest(
        repository: &str,
        snapshots: Vec<ResticSnapshot>,
        time: DateTime<Utc>,
    ) -> Option<SnapshotDescriptor> {
        let mut best: Option<SnapshotDescriptor> = None;

        for snapshot in snapshots {
            let short_id = snapshot
                .short_id
                .clone()
                .unwrap_or_else(|| snapshot.id.chars().take(8).collect());
            let candidate = SnapshotDescriptor {
                repository: repository.to_string(),
                id: snapshot.id,
                short_id,
                time: snapshot.time,
                paths: snapshot.paths,
            };

            let closer = match &best {
                Some(current) => candidate.distance_to(time) < current.distance_to(time),
                None => true,
            };
            if closer {
                best = Some(candidate);
            }
        }

        best
    }

    /// 挂载内快照内容所在目录：`<mount>/ids/<short_id>/<源路径>`
    fn content_dir(mount_point: &Path, snapshot: &SnapshotDescriptor) -> PathBuf {
        let root = mount_point.join("ids").join(&snapshot.short_id);
        match snapshot.paths.first() {
            Some(path) => root.join(path.trim_start_matches('/')),
            None => root,
        }
    }
}

#[async_trait]
impl RepositoryBackend for ResticBackend {
    async fn find_nearest(
        &self,
        destination: &Destination,
        volume: &str,
        time: DateTime<Utc>,
    ) -> Result<Option<SnapshotDescriptor>> {
        let spec = self
            .command(destination)
            .args(["snapshots", "--json", "--tag", volume]);

        let output = self.runner.run(&spec).await?;
        let snapshots: Vec<ResticSnapshot> = serde_json::from_slice(&output.stdout)?;
        debug!(
            "{} holds {} snapshots of {}",
            destination.repository,
            snapshots.len(),
            volume
        );

        Ok(Self::nearest(&destination.repository, snapshots, time))
    }

    async fn mount_snapshot(
        &self,
        destination: &Destination,
        snapshot: &SnapshotDescriptor,
        mount_point: &Path,
    ) -> Result<PathBuf> {
        fs::create_dir_all(mount_point).await.map_err(|e| {
            Error::Storage(format!("Failed to create mount point {:?}: {}", mount_point, e))
        })?;

        let spec = self.command(destination).arg("mount").path_arg(mount_point);
        let mut child = spec
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::backend(spec.display(), None, format!("failed to spawn restic: {}", e)))?;

        let content = Self::content_dir(mount_point, snapshot);
        let deadline = tokio::time::Instant::now() + self.mount_timeout;

        loop {
            if fs::metadata(&content).await.is_ok() {
                break;
            }

            if let Some(status) = child.try_wait().map_err(|e| {
                Error::backend(spec.display(), None, format!("failed to poll restic mount: {}", e))
            })? {
                return Err(Error::backend(
                    spec.display(),
                    status.code(),
                    "restic mount exited before the snapshot became available",
                ));
            }

            if tokio::time::Instant::now() >= deadline {
                let _ = child.kill().await;
                let _ = self.runner.output(&CommandSpec::new(UMOUNT).path_arg(mount_point)).await;
                return Err(Error::backend_timeout(spec.display(), self.mount_timeout.as_secs()));
            }

            tokio::time::sleep(MOUNT_POLL_INTERVAL).await;
        }

        self.mounts.lock().await.insert(mount_point.to_path_buf(), child);
        info!(
            "Mounted snapshot {} of {} at {:?}",
            snapshot.short_id, destination.repository, mount_point
        );

        Ok(content)
    }

    async fn unmount_snapshot(&self, destination: &Destination, mount_point: &Path) -> Result<()> {
        let spec = CommandSpec::new(UMOUNT).path_arg(mount_point);
        self.runner.run(&spec).await?;

        let child = self.mounts.lock().await.remove(mount_point);
        if let Some(mut child) = child {
            match tokio::time::timeout(Duration::from_secs(30), child.wait()).await {
                Ok(Ok(status)) => debug!("restic mount exited with {}", status),
                Ok(Err(e)) => warn!("Failed to reap restic mount: {}", e),
                Err(_) => {
                    warn!("restic mount did not exit after unmount, killing");
                    let _ = child.kill().await;
                }
            }
        }

        info!(
            "Unmounted snapshot of {} from {:?}",
            destination.repository, mount_point
        );
        Ok(())
    }

    async fn backup(
        &self,
        destination: &Destination,
        volume: &str,
        source: &Path,
        timestamp: BackupTimestamp,
    ) -> Result<()> {
        info!(
            "Backing up {} ({:?}) to {} at {}",
            volume, source, destination.repository, timestamp
        );

        let spec = self
            .command(destination)
            .args(["backup", "--tag", volume, "--host", self.host.as_str()])
            .args(["--time", timestamp.as_restic_time().as_str()])
            // --time 按本地时区解析，时间戳是 UTC
            .env("TZ", "UTC")
            .path_arg(source);
        self.runner.run(&spec).await?;

        info!("Backup of {} to {} complete", volume, destination.repository);
        Ok(())
    }

    fn backend_type(&self) -> &str {
        "restic"
    }
}
