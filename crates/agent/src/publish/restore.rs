/// 快照恢复
///
/// 挂载卷 -> 只读挂载快照 -> 复制目录树 -> 卸载两者。
/// 无论哪一步失败，已经建立的挂载都会在返回前卸载

use common::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use crate::lvm::{ThinPoolManager, VolumeBackend};
use crate::repository::{RepositoryBackend, SnapshotMatch};

pub struct RestoreOrchestrator {
    pool: Arc<ThinPoolManager>,
    volumes: Arc<dyn VolumeBackend>,
    repository: Arc<dyn RepositoryBackend>,
}

impl RestoreOrchestrator {
    pub fn new(
        pool: Arc<ThinPoolManager>,
        volumes: Arc<dyn VolumeBackend>,
        repository: Arc<dyn RepositoryBackend>,
    ) -> Self {
        Self {
            pool,
            volumes,
            repository,
        }
    }

    /// 用 `source` 快照的内容填充卷 `volume`
    ///
    /// 失败时不重试；卷保持存在，是否重试由调用方决定
    pub async fn restore(
        &self,
        volume: &str,
        source: &SnapshotMatch,
        staging_volume: &Path,
        staging_snapshot: &Path,
    ) -> Result<()> {
        info!(
            "Restoring {} from snapshot {} of {}",
            volume, source.snapshot.short_id, source.destination.repository
        );

        self.pool.ensure_mounted(volume, staging_volume).await?;

        let content = match self
            .repository
            .mount_snapshot(&source.destination, &source.snapshot, staging_snapshot)
            .await
        {
            Ok(content) => content,
            Err(e) => {
                self.release_volume(volume).await;
                return Err(e);
            }
        };

        let copied = self.volumes.copy_tree(&content, staging_volume).await;

        let snapshot_released = self
            .repository
            .unmount_snapshot(&source.destination, staging_snapshot)
            .await;
        if let Err(e) = &snapshot_released {
            error!("Failed to unmount snapshot at {:?}: {}", staging_snapshot, e);
        }
        let volume_released = self.pool.ensure_unmounted(volume).await;
        if let Err(e) = &volume_released {
            error!("Failed to unmount {} from {:?}: {}", volume, staging_volume, e);
        }

        // 复制失败优先上报，其次是清理失败
        copied?;
        snapshot_released?;
        volume_released?;

        info!("Restored {} from {}", volume, source.destination.repository);
        Ok(())
    }

    async fn release_volume(&self, volume: &str) {
        if let Err(e) = self.pool.ensure_unmounted(volume).await {
            error!("Failed to unmount {} after aborted restore: {}", volume, e);
        }
    }
}
