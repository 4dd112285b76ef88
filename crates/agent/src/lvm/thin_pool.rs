/// 精简池管理器
///
/// 持有单个精简池的卷列表内存镜像。所有变更操作在整个调用期间持有池锁，
/// 变更成功后立即从后端整体刷新卷列表（整体替换，从不增量合并）。

use common::{ByteSize, Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::driver::{ThinPool, Volume, VolumeBackend};

/// EnsurePresent 实际执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeAction {
    Created,
    Extended,
    Unchanged,
}

/// EnsurePresent 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureOutcome {
    pub volume: Volume,
    pub action: VolumeAction,
}

impl EnsureOutcome {
    pub fn created(&self) -> bool {
        self.action == VolumeAction::Created
    }
}

type VolumeMap = HashMap<String, Volume>;

/// 精简池管理器
pub struct ThinPoolManager {
    pool: ThinPool,
    backend: Arc<dyn VolumeBackend>,
    /// 卷名 -> 卷记录
    volumes: Mutex<VolumeMap>,
}

impl ThinPoolManager {
    /// 打开精简池
    ///
    /// 池的存在性与精简属性只在此处校验一次
    pub async fn open(long_name: &str, backend: Arc<dyn VolumeBackend>) -> Result<Self> {
        let pool = ThinPool::parse(long_name)?;

        if !backend.pool_is_thin(&pool).await? {
            return Err(Error::NotFound(format!(
                "thin pool {} does not exist or is not thin-provisioned",
                pool
            )));
        }

        let manager = Self {
            pool,
            backend,
            volumes: Mutex::new(HashMap::new()),
        };

        {
            let mut volumes = manager.volumes.lock().await;
            manager.refresh_locked(&mut volumes).await?;
            info!(
                "Opened thin pool {} via {} backend ({} volumes)",
                manager.pool,
                manager.backend.backend_type(),
                volumes.len()
            );
        }

        Ok(manager)
    }

    /// 从后端整体刷新卷列表
    async fn refresh_locked(&self, volumes: &mut MutexGuard<'_, VolumeMap>) -> Result<()> {
        let listed = self.backend.list_volumes(&self.pool).await?;
        **volumes = listed
            .into_iter()
            .map(|volume| (volume.name.clone(), volume))
            .collect();
        Ok(())
    }

    /// 刷新后查找卷
    async fn find_locked(
        &self,
        volumes: &mut MutexGuard<'_, VolumeMap>,
        name: &str,
    ) -> Result<Option<Volume>> {
        self.refresh_locked(volumes).await?;
        Ok(volumes.get(name).cloned())
    }

    /// 刷新后取卷，不存在时报 NotFound
    async fn require_locked(
        &self,
        volumes: &mut MutexGuard<'_, VolumeMap>,
        name: &str,
    ) -> Result<Volume> {
        self.find_locked(volumes, name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("volume {} not found in {}", name, self.pool)))
    }

    /// 确保卷存在且不小于 `min_size`
    ///
    /// 不存在则创建并格式化；存在但更小则原地扩容；否则不做任何变更
    pub async fn ensure_present(&self, name: &str, min_size: ByteSize) -> Result<EnsureOutcome> {
        if min_size.as_i64() <= 0 {
            return Err(Error::InvalidRequest(format!(
                "volume size must be positive, got {}",
                min_size
            )));
        }

        let mut volumes = self.volumes.lock().await;

        let action = match self.find_locked(&mut volumes, name).await? {
            None => {
                if let Err(e) = self.backend.create_volume(&self.pool, name, min_size).await {
                    self.discard_partial_locked(&mut volumes, name).await;
                    return Err(e);
                }
                VolumeAction::Created
            }
            Some(existing) if existing.size < min_size => {
                debug!(
                    "Volume {} is {} but {} requested, extending",
                    name, existing.size, min_size
                );
                self.backend.extend_volume(&self.pool, name, min_size).await?;
                VolumeAction::Extended
            }
            Some(existing) => {
                debug!("Volume {} already present ({})", name, existing.size);
                return Ok(EnsureOutcome {
                    volume: existing,
                    action: VolumeAction::Unchanged,
                });
            }
        };

        let volume = self.require_locked(&mut volumes, name).await?;
        info!("Volume {} {:?} ({})", name, action, volume.size);

        Ok(EnsureOutcome { volume, action })
    }

    /// 创建失败后删除留下的半成品卷（例如已分配但未格式化），创建要么完整要么不发生
    async fn discard_partial_locked(&self, volumes: &mut MutexGuard<'_, VolumeMap>, name: &str) {
        match self.find_locked(volumes, name).await {
            Ok(Some(_)) => {
                warn!("Removing partially created volume {} from {}", name, self.pool);
                if let Err(e) = self.backend.remove_volume(&self.pool, name).await {
                    error!("Failed to remove partially created volume {}: {}", name, e);
                }
                if let Err(e) = self.refresh_locked(volumes).await {
                    warn!("Failed to refresh {} after rollback: {}", self.pool, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to check for partially created volume {}: {}", name, e),
        }
    }

    /// 确保卷不存在，已不存在时为空操作
    pub async fn ensure_absent(&self, name: &str) -> Result<()> {
        let mut volumes = self.volumes.lock().await;

        if self.find_locked(&mut volumes, name).await?.is_none() {
            debug!("Volume {} already absent", name);
            return Ok(());
        }

        self.backend.remove_volume(&self.pool, name).await?;
        self.refresh_locked(&mut volumes).await?;
        info!("Volume {} removed from {}", name, self.pool);
        Ok(())
    }

    /// 刷新池状态并返回卷记录
    pub async fn get_volume(&self, name: &str) -> Result<Option<Volume>> {
        let mut volumes = self.volumes.lock().await;
        self.find_locked(&mut volumes, name).await
    }

    /// 刷新池状态并返回全部卷
    pub async fn list_volumes(&self) -> Result<Vec<Volume>> {
        let mut volumes = self.volumes.lock().await;
        self.refresh_locked(&mut volumes).await?;
        let mut listed: Vec<Volume> = volumes.values().cloned().collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    /// 确保卷挂载在 `target`
    ///
    /// 以实时查询的挂载状态为准；已挂载在别处时拒绝
    pub async fn ensure_mounted(&self, name: &str, target: &Path) -> Result<Volume> {
        let mut volumes = self.volumes.lock().await;
        let mut volume = self.require_locked(&mut volumes, name).await?;
        let device = volume.device_path();

        match self.backend.query_mount(&device).await? {
            Some(current) if current == target => {
                debug!("Volume {} already mounted at {:?}", name, target);
                volume.apply_mount_state(Some(current));
                volumes.insert(name.to_string(), volume.clone());
                return Ok(volume);
            }
            Some(current) => {
                return Err(Error::AlreadyExists(format!(
                    "volume {} is mounted at {:?}, refusing to mount at {:?}",
                    name, current, target
                )));
            }
            None => {}
        }

        self.backend.mount(&device, target).await?;
        self.require_locked(&mut volumes, name).await
    }

    /// 确保卷未挂载，以实时查询的挂载状态为准
    pub async fn ensure_unmounted(&self, name: &str) -> Result<Volume> {
        let mut volumes = self.volumes.lock().await;
        let mut volume = self.require_locked(&mut volumes, name).await?;
        let device = volume.device_path();

        match self.backend.query_mount(&device).await? {
            None => {
                if volume.mounted {
                    warn!("Volume {} recorded as mounted but is not, correcting", name);
                }
                volume.apply_mount_state(None);
                volumes.insert(name.to_string(), volume.clone());
                Ok(volume)
            }
            Some(current) => {
                debug!("Unmounting volume {} from {:?}", name, current);
                self.backend.unmount(&device).await?;
                self.require_locked(&mut volumes, name).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lvm::fake::{FakeVolumeBackend, VolumeCall};
    use std::path::PathBuf;

    const POOL: &str = "/dev/vg0/thinpool";

    async fn manager_with(backend: FakeVolumeBackend) -> (ThinPoolManager, Arc<FakeVolumeBackend>) {
        let backend = Arc::new(backend);
        let manager = ThinPoolManager::open(POOL, backend.clone()).await.unwrap();
        backend.reset_calls();
        (manager, backend)
    }

    #[tokio::test]
    async fn test_open_rejects_non_thin_pool() {
        let backend = Arc::new(FakeVolumeBackend::new("vg0").not_thin());
        let err = ThinPoolManager::open(POOL, backend).await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_open_loads_existing_volumes() {
        let (manager, _) =
            manager_with(FakeVolumeBackend::new("vg0").with_volume("test-volume", ByteSize::gib(1))).await;
        let volumes = manager.list_volumes().await.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "test-volume");
        assert_eq!(volumes[0].vg_name, "vg0");
    }

    #[tokio::test]
    async fn test_ensure_present_creates_missing_volume() {
        let (manager, backend) = manager_with(FakeVolumeBackend::new("vg0")).await;

        let outcome = manager.ensure_present("data", ByteSize::gib(2)).await.unwrap();
        assert!(outcome.created());
        assert_eq!(outcome.volume.size, ByteSize::gib(2));
        assert_eq!(
            backend.mutations(),
            vec![VolumeCall::Create("data".into(), ByteSize::gib(2))]
        );
    }

    #[tokio::test]
    async fn test_ensure_present_is_idempotent() {
        let (manager, backend) = manager_with(FakeVolumeBackend::new("vg0")).await;

        let first = manager.ensure_present("data", ByteSize::gib(2)).await.unwrap();
        backend.reset_calls();

        let same = manager.ensure_present("data", ByteSize::gib(2)).await.unwrap();
        let smaller = manager.ensure_present("data", ByteSize::gib(1)).await.unwrap();

        assert_eq!(same.action, VolumeAction::Unchanged);
        assert_eq!(smaller.action, VolumeAction::Unchanged);
        assert_eq!(same.volume, first.volume);
        assert_eq!(smaller.volume, first.volume);
        assert!(backend.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_present_extends_exactly_once() {
        let (manager, backend) =
            manager_with(FakeVolumeBackend::new("vg0").with_volume("data", ByteSize::gib(1))).await;

        let outcome = manager.ensure_present("data", ByteSize::gib(3)).await.unwrap();
        assert_eq!(outcome.action, VolumeAction::Extended);
        assert_eq!(outcome.volume.size, ByteSize::gib(3));

        let again = manager.ensure_present("data", ByteSize::gib(3)).await.unwrap();
        assert_eq!(again.action, VolumeAction::Unchanged);

        assert_eq!(
            backend.mutations(),
            vec![VolumeCall::Extend("data".into(), ByteSize::gib(3))]
        );
    }

    #[tokio::test]
    async fn test_ensure_present_rejects_non_positive_size() {
        let (manager, backend) = manager_with(FakeVolumeBackend::new("vg0")).await;
        let err = manager.ensure_present("data", ByteSize(0)).await.unwrap_err();
        assert!(err.is_invalid_request());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_surfaces_verbatim() {
        let (manager, backend) = manager_with(FakeVolumeBackend::new("vg0")).await;
        backend.fail_on("create");

        let err = manager.ensure_present("data", ByteSize::gib(1)).await.unwrap_err();
        assert!(err.is_backend_failure());
        assert!(err.to_string().contains("create failed"));
        assert!(manager.get_volume("data").await.unwrap().is_none());
        // 不自动重试
        let creates = backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, VolumeCall::Create(..)))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_failed_format_removes_half_created_volume() {
        let (manager, backend) = manager_with(FakeVolumeBackend::new("vg0")).await;
        backend.fail_on("mkfs");

        let err = manager.ensure_present("data", ByteSize::gib(1)).await.unwrap_err();
        assert!(err.is_backend_failure());
        assert_eq!(
            backend.mutations(),
            vec![
                VolumeCall::Create("data".into(), ByteSize::gib(1)),
                VolumeCall::Remove("data".into()),
            ]
        );
        assert!(manager.get_volume("data").await.unwrap().is_none());

        backend.clear_failures();
        let outcome = manager.ensure_present("data", ByteSize::gib(1)).await.unwrap();
        assert!(outcome.created());
    }

    #[tokio::test]
    async fn test_ensure_absent_is_idempotent() {
        let (manager, backend) =
            manager_with(FakeVolumeBackend::new("vg0").with_volume("data", ByteSize::gib(1))).await;

        manager.ensure_absent("data").await.unwrap();
        assert_eq!(backend.mutations(), vec![VolumeCall::Remove("data".into())]);
        assert!(manager.get_volume("data").await.unwrap().is_none());

        backend.reset_calls();
        manager.ensure_absent("data").await.unwrap();
        assert!(backend.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_mount_helpers_are_idempotent() {
        let (manager, backend) =
            manager_with(FakeVolumeBackend::new("vg0").with_volume("data", ByteSize::gib(1))).await;
        let target = PathBuf::from("/mnt/data");

        let mounted = manager.ensure_mounted("data", &target).await.unwrap();
        assert!(mounted.is_mounted_at(&target));

        let again = manager.ensure_mounted("data", &target).await.unwrap();
        assert!(again.is_mounted_at(&target));

        let unmounted = manager.ensure_unmounted("data").await.unwrap();
        assert!(!unmounted.mounted);
        assert_eq!(unmounted.target, None);
        manager.ensure_unmounted("data").await.unwrap();

        let device = PathBuf::from("/dev/vg0/data");
        assert_eq!(
            backend.mutations(),
            vec![
                VolumeCall::Mount(device.clone(), target.clone()),
                VolumeCall::Unmount(device),
            ]
        );
    }

    #[tokio::test]
    async fn test_ensure_mounted_refuses_other_target() {
        let (manager, _) =
            manager_with(FakeVolumeBackend::new("vg0").with_volume("data", ByteSize::gib(1))).await;
        manager.ensure_mounted("data", Path::new("/mnt/a")).await.unwrap();

        let err = manager.ensure_mounted("data", Path::new("/mnt/b")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_mount_of_missing_volume_is_not_found() {
        let (manager, _) = manager_with(FakeVolumeBackend::new("vg0")).await;
        let err = manager.ensure_mounted("ghost", Path::new("/mnt/ghost")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_concurrent_ensure_present_creates_once() {
        let (manager, backend) = manager_with(FakeVolumeBackend::new("vg0")).await;
        let manager = Arc::new(manager);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.ensure_present("shared", ByteSize::gib(1)).await })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().created() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(backend.mutations().len(), 1);
    }
}
