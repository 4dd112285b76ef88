/// 发布 / 取消发布状态机
///
/// 发布：Presenting -> Selecting -> Restoring -> FinalMounting -> Published
/// 取消发布：StagingRemount -> BackingUp -> Unpublished
///
/// 同一个卷的发布与取消发布由卷级锁串行化，不同卷之间互不影响

use chrono::Utc;
use common::utils::{format_bytes, validate_target_path, validate_volume_id};
use common::{BackupTimestamp, ByteSize, Error, PublishPhase, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::restore::RestoreOrchestrator;
use crate::config::RestorePolicy;
use crate::lvm::{ThinPoolManager, Volume, VolumeBackend};
use crate::repository::{
    BackupCoordinator, BackupReport, Destination, DestinationSelector, RepositoryBackend,
    SnapshotMatch,
};

/// 控制器参数
#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// 暂存挂载根目录
    pub staging_path: PathBuf,
    pub default_volume_size: ByteSize,
    pub restore_policy: RestorePolicy,
    /// 按配置顺序排列
    pub destinations: Vec<Destination>,
}

/// 发布结果
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub volume: Volume,
    pub created: bool,
    /// 本次发布用来填充卷的快照
    pub restored_from: Option<SnapshotMatch>,
}

/// 取消发布结果，备份失败作为告警携带
#[derive(Debug, Clone)]
pub struct UnpublishOutcome {
    pub report: BackupReport,
    /// 未执行备份时的原因
    pub skipped: Option<String>,
}

impl UnpublishOutcome {
    pub fn timestamp(&self) -> BackupTimestamp {
        self.report.timestamp
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut warnings: Vec<String> = self.skipped.iter().cloned().collect();
        warnings.extend(self.report.warnings());
        warnings
    }
}

pub struct PublishUnpublishController {
    pool: Arc<ThinPoolManager>,
    selector: DestinationSelector,
    restorer: RestoreOrchestrator,
    coordinator: BackupCoordinator,
    settings: PublishSettings,
    /// 卷名 -> 当前阶段
    phases: RwLock<HashMap<String, PublishPhase>>,
    /// 卷名 -> 卷级操作锁
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// 恢复失败、下次发布需要重新恢复的卷
    seed_pending: Mutex<HashSet<String>>,
}

impl PublishUnpublishController {
    pub fn new(
        pool: Arc<ThinPoolManager>,
        volumes: Arc<dyn VolumeBackend>,
        repository: Arc<dyn RepositoryBackend>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            selector: DestinationSelector::new(repository.clone()),
            restorer: RestoreOrchestrator::new(pool.clone(), volumes, repository.clone()),
            coordinator: BackupCoordinator::new(repository),
            pool,
            settings,
            phases: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            seed_pending: Mutex::new(HashSet::new()),
        }
    }

    /// 卷当前所处阶段，从未操作过的卷为 Idle
    pub async fn phase(&self, volume: &str) -> PublishPhase {
        self.phases
            .read()
            .await
            .get(volume)
            .copied()
            .unwrap_or_default()
    }

    async fn set_phase(&self, volume: &str, phase: PublishPhase) {
        debug!("Volume {} -> {}", volume, phase);
        self.phases.write().await.insert(volume.to_string(), phase);
    }

    async fn volume_lock(&self, volume: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(volume.to_string())
            .or_default()
            .clone()
    }

    /// 卷空闲时丢弃其锁；锁的克隆只在 `locks` 加锁期间产生，引用计数为 1 即无人等待
    async fn release_lock(&self, volume: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        if self.phase(volume).await != PublishPhase::Unpublished {
            return;
        }
        let mut locks = self.locks.lock().await;
        if locks.get(volume).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(volume);
        }
    }

    fn staging_volume(&self, volume: &str) -> PathBuf {
        self.settings.staging_path.join(volume)
    }

    fn staging_snapshot(&self, volume: &str) -> PathBuf {
        self.settings.staging_path.join(".snapshots").join(volume)
    }

    /// 发布卷：确保存在、必要时从备份填充、挂载到目标路径
    pub async fn publish(
        &self,
        volume_id: &str,
        target_path: &str,
        capacity_bytes: Option<i64>,
    ) -> Result<PublishOutcome> {
        validate_volume_id(volume_id)?;
        validate_target_path(target_path)?;

        let size = capacity_bytes
            .map(ByteSize::bytes)
            .unwrap_or(self.settings.default_volume_size);
        if size.as_i64() <= 0 {
            return Err(Error::InvalidRequest(format!(
                "requested size must be positive, got {}",
                size
            )));
        }

        let lock = self.volume_lock(volume_id).await;
        let _guard = lock.lock().await;

        info!(
            "Publishing {} at {} ({})",
            volume_id,
            target_path,
            format_bytes(size.as_i64())
        );
        let result = self
            .publish_locked(volume_id, Path::new(target_path), size)
            .await;

        if let Err(e) = &result {
            error!("Failed to publish {}: {}", volume_id, e);
            self.set_phase(volume_id, PublishPhase::Failed).await;
        }
        result
    }

    async fn publish_locked(
        &self,
        volume: &str,
        target: &Path,
        size: ByteSize,
    ) -> Result<PublishOutcome> {
        self.set_phase(volume, PublishPhase::Presenting).await;
        let ensured = self.pool.ensure_present(volume, size).await?;
        let created = ensured.created();

        if ensured.volume.is_mounted_at(target) {
            info!("{} already published at {:?}", volume, target);
            self.set_phase(volume, PublishPhase::Published).await;
            return Ok(PublishOutcome {
                volume: ensured.volume,
                created,
                restored_from: None,
            });
        }

        let seed_pending = self.seed_pending.lock().await.contains(volume);
        let restore = created || seed_pending || self.settings.restore_policy == RestorePolicy::Always;

        let mut restored_from = None;
        if restore {
            self.set_phase(volume, PublishPhase::Selecting).await;
            let found = self
                .selector
                .select_snapshot(volume, &self.settings.destinations, Utc::now())
                .await;

            match found {
                None => {
                    debug!("Nothing to restore for {}", volume);
                    self.seed_pending.lock().await.remove(volume);
                }
                Some(source) => {
                    self.set_phase(volume, PublishPhase::Restoring).await;
                    let restored = self
                        .restorer
                        .restore(
                            volume,
                            &source,
                            &self.staging_volume(volume),
                            &self.staging_snapshot(volume),
                        )
                        .await;

                    if let Err(e) = restored {
                        // 卷保留，下次发布重新恢复
                        self.seed_pending.lock().await.insert(volume.to_string());
                        return Err(e);
                    }
                    self.seed_pending.lock().await.remove(volume);
                    restored_from = Some(source);
                }
            }
        } else {
            debug!("{} already seeded, skipping restore", volume);
        }

        self.set_phase(volume, PublishPhase::FinalMounting).await;
        let mounted = self.pool.ensure_mounted(volume, target).await?;

        self.set_phase(volume, PublishPhase::Published).await;
        info!("Published {} at {:?}", volume, target);

        Ok(PublishOutcome {
            volume: mounted,
            created,
            restored_from,
        })
    }

    /// 取消发布：重新挂载到暂存目录，向所有目的地备份，然后卸载
    ///
    /// 重新挂载失败时不做任何备份；个别目的地备份失败不影响结果。
    /// 恢复失败待重试或未挂载的卷不备份，避免空卷成为最新快照
    pub async fn unpublish(&self, volume_id: &str, target_path: &str) -> Result<UnpublishOutcome> {
        validate_volume_id(volume_id)?;
        validate_target_path(target_path)?;

        let lock = self.volume_lock(volume_id).await;
        let guard = lock.lock().await;

        info!("Unpublishing {} from {}", volume_id, target_path);
        let result = self
            .unpublish_locked(volume_id, Path::new(target_path))
            .await;

        if let Err(e) = &result {
            error!("Failed to unpublish {}: {}", volume_id, e);
            self.set_phase(volume_id, PublishPhase::Failed).await;
        }

        drop(guard);
        self.release_lock(volume_id, lock).await;
        result
    }

    async fn unpublish_locked(&self, volume: &str, target: &Path) -> Result<UnpublishOutcome> {
        let timestamp = BackupTimestamp::capture();
        let staging = self.staging_volume(volume);

        self.set_phase(volume, PublishPhase::StagingRemount).await;
        let current = self
            .pool
            .get_volume(volume)
            .await?
            .ok_or_else(|| Error::NotFound(format!("volume {} does not exist", volume)))?;

        match &current.target {
            Some(mounted) if mounted != target && *mounted != staging => {
                warn!(
                    "{} is mounted at {:?}, not at {:?}; unmounting anyway",
                    volume, mounted, target
                );
            }
            _ => {}
        }

        let skipped = if self.seed_pending.lock().await.contains(volume) {
            Some(format!("{} was never seeded from backup, skipping backup", volume))
        } else if current.target.is_none() {
            Some(format!("{} is not mounted, nothing to back up", volume))
        } else {
            None
        };

        if let Some(reason) = skipped {
            warn!("{}", reason);
            self.pool.ensure_unmounted(volume).await?;
            self.set_phase(volume, PublishPhase::Unpublished).await;
            return Ok(UnpublishOutcome {
                report: BackupReport {
                    timestamp,
                    results: Vec::new(),
                },
                skipped: Some(reason),
            });
        }

        self.pool.ensure_unmounted(volume).await?;
        self.pool.ensure_mounted(volume, &staging).await?;

        self.set_phase(volume, PublishPhase::BackingUp).await;
        let report = self
            .coordinator
            .backup_all(volume, &staging, &self.settings.destinations, timestamp)
            .await;

        self.pool.ensure_unmounted(volume).await?;

        for warning in report.warnings() {
            warn!("{}: {}", volume, warning);
        }

        self.set_phase(volume, PublishPhase::Unpublished).await;
        info!("Unpublished {} (backup at {})", volume, timestamp);

        Ok(UnpublishOutcome {
            report,
            skipped: None,
        })
    }
}
