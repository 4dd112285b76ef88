/// 脚本化的备份仓库替身
///
/// 每个仓库预置一组快照；按仓库与操作注入失败；记录全部调用

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BackupTimestamp, Error, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::driver::{Destination, RepositoryBackend, SnapshotDescriptor};

/// 记录下来的仓库调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryCall {
    FindNearest(String, String),
    MountSnapshot(String, String, PathBuf),
    UnmountSnapshot(String, PathBuf),
    Backup(String, String, PathBuf, BackupTimestamp),
}

#[derive(Default)]
struct State {
    snapshots: HashMap<String, Vec<SnapshotDescriptor>>,
    calls: Vec<RepositoryCall>,
    /// (仓库, 操作)
    failures: HashSet<(String, &'static str)>,
    /// 挂载点 -> 仓库
    mounts: HashMap<PathBuf, String>,
}

#[derive(Default)]
pub struct FakeRepositoryBackend {
    state: Mutex<State>,
}

impl FakeRepositoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在仓库中预置一个快照
    pub fn with_snapshot(self, repository: &str, id: &str, time: DateTime<Utc>) -> Self {
        let snapshot = SnapshotDescriptor {
            repository: repository.to_string(),
            id: id.to_string(),
            short_id: id.chars().take(8).collect(),
            time,
            paths: vec![],
        };
        self.state
            .lock()
            .unwrap()
            .snapshots
            .entry(repository.to_string())
            .or_default()
            .push(snapshot);
        self
    }

    /// 让某仓库的指定操作（"find" / "mount" / "unmount" / "backup"）失败
    pub fn fail_on(&self, repository: &str, op: &'static str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((repository.to_string(), op));
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub fn calls(&self) -> Vec<RepositoryCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn reset_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// 所有备份调用：(仓库, 时间戳)
    pub fn backups(&self) -> Vec<(String, BackupTimestamp)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RepositoryCall::Backup(repository, _, _, timestamp) => Some((repository, timestamp)),
                _ => None,
            })
            .collect()
    }

    pub fn active_mounts(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().mounts.keys().cloned().collect()
    }

    fn record(&self, call: RepositoryCall, repository: &str, op: &'static str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.failures.contains(&(repository.to_string(), op)) {
            return Err(Error::backend(
                format!("fake restic {}", op),
                Some(1),
                format!("{} unreachable", repository),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RepositoryBackend for FakeRepositoryBackend {
    async fn find_nearest(
        &self,
        destination: &Destination,
        volume: &str,
        time: DateTime<Utc>,
    ) -> Result<Option<SnapshotDescriptor>> {
        let repository = destination.repository.as_str();
        self.record(
            RepositoryCall::FindNearest(repository.to_string(), volume.to_string()),
            repository,
            "find",
        )?;

        let state = self.state.lock().unwrap();
        let mut best: Option<&SnapshotDescriptor> = None;
        for snapshot in state.snapshots.get(repository).into_iter().flatten() {
            if best.map_or(true, |b| snapshot.distance_to(time) < b.distance_to(time)) {
                best = Some(snapshot);
            }
        }
        Ok(best.cloned())
    }

    async fn mount_snapshot(
        &self,
        destination: &Destination,
        snapshot: &SnapshotDescriptor,
        mount_point: &Path,
    ) -> Result<PathBuf> {
        let repository = destination.repository.as_str();
        self.record(
            RepositoryCall::MountSnapshot(
                repository.to_string(),
                snapshot.id.clone(),
                mount_point.to_path_buf(),
            ),
            repository,
            "mount",
        )?;

        let mut state = self.state.lock().unwrap();
        if state.mounts.contains_key(mount_point) {
            return Err(Error::backend("fake restic mount", Some(1), "mountpoint busy"));
        }
        state
            .mounts
            .insert(mount_point.to_path_buf(), repository.to_string());
        Ok(mount_point.join("ids").join(&snapshot.short_id))
    }

    async fn unmount_snapshot(&self, destination: &Destination, mount_point: &Path) -> Result<()> {
        let repository = destination.repository.as_str();
        self.record(
            RepositoryCall::UnmountSnapshot(repository.to_string(), mount_point.to_path_buf()),
            repository,
            "unmount",
        )?;

        let mut state = self.state.lock().unwrap();
        state
            .mounts
            .remove(mount_point)
            .map(|_| ())
            .ok_or_else(|| Error::backend("fake umount", Some(32), "not mounted"))
    }

    async fn backup(
        &self,
        destination: &Destination,
        volume: &str,
        source: &Path,
        timestamp: BackupTimestamp,
    ) -> Result<()> {
        let repository = destination.repository.as_str();
        self.record(
            RepositoryCall::Backup(
                repository.to_string(),
                volume.to_string(),
                source.to_path_buf(),
                timestamp,
            ),
            repository,
            "backup",
        )
    }

    fn backend_type(&self) -> &str {
        "fake"
    }
}
