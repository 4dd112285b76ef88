/// 恢复源选择
///
/// 并发询问所有目的地离目标时间最近的快照，取距离最小者；
/// 距离相同时配置靠前的目的地胜出

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::driver::{Destination, RepositoryBackend, SnapshotDescriptor};

/// 选中的快照及其所在目的地
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMatch {
    pub destination: Destination,
    pub snapshot: SnapshotDescriptor,
}

pub struct DestinationSelector {
    backend: Arc<dyn RepositoryBackend>,
}

impl DestinationSelector {
    pub fn new(backend: Arc<dyn RepositoryBackend>) -> Self {
        Self { backend }
    }

    /// 选择离 `target` 最近的快照
    ///
    /// 单个目的地查询失败只记日志并视为没有快照；全部没有时返回 `None`，
    /// 表示跳过恢复而不是恢复失败
    pub async fn select_snapshot(
        &self,
        volume: &str,
        destinations: &[Destination],
        target: DateTime<Utc>,
    ) -> Option<SnapshotMatch> {
        let queries = destinations.iter().map(|destination| async move {
            match self.backend.find_nearest(destination, volume, target).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(
                        "Failed to query {} for snapshots of {}: {}",
                        destination.repository, volume, e
                    );
                    None
                }
            }
        });

        // join_all 的结果与配置顺序一致
        let results = join_all(queries).await;

        let mut best: Option<SnapshotMatch> = None;
        for (destination, found) in destinations.iter().zip(results) {
            let Some(snapshot) = found else {
                debug!("{} has no snapshot of {}", destination.repository, volume);
                continue;
            };

            let closer = match &best {
                Some(current) => {
                    snapshot.distance_to(target) < current.snapshot.distance_to(target)
                }
                None => true,
            };
            if closer {
                best = Some(SnapshotMatch {
                    destination: destination.clone(),
                    snapshot,
                });
            }
        }

        match &best {
            Some(found) => info!(
                "Selected snapshot {} ({}) from {} for {}",
                found.snapshot.short_id, found.snapshot.time, found.destination.repository, volume
            ),
            None => info!("No snapshot of {} in any destination", volume),
        }

        best
    }
}
