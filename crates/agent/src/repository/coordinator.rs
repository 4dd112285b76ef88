/// 多目的地备份扇出
///
/// 每个目的地一个任务，共享同一个时间戳；等待全部结束，不因个别失败取消其他任务

use common::{BackupTimestamp, Error};
use futures::future::join_all;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::driver::{Destination, RepositoryBackend};

/// 单个目的地的备份结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationResult {
    pub repository: String,
    pub error: Option<String>,
}

impl DestinationResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// 一次扇出备份的汇总结果，顺序与配置一致
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    pub timestamp: BackupTimestamp,
    pub results: Vec<DestinationResult>,
}

impl BackupReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &DestinationResult> {
        self.results.iter().filter(|r| r.succeeded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DestinationResult> {
        self.results.iter().filter(|r| !r.succeeded())
    }

    /// 部分（但不是全部）目的地失败
    pub fn is_partial_failure(&self) -> bool {
        let failed = self.failed().count();
        failed > 0 && failed < self.results.len()
    }

    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.failed().count() == self.results.len()
    }

    /// 每个失败目的地一条告警
    pub fn warnings(&self) -> Vec<String> {
        self.failed()
            .map(|r| {
                format!(
                    "backup to {} failed: {}",
                    r.repository,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect()
    }
}

pub struct BackupCoordinator {
    backend: Arc<dyn RepositoryBackend>,
}

impl BackupCoordinator {
    pub fn new(backend: Arc<dyn RepositoryBackend>) -> Self {
        Self { backend }
    }

    /// 以同一时间戳向所有目的地备份 `source`
    pub async fn backup_all(
        &self,
        volume: &str,
        source: &Path,
        destinations: &[Destination],
        timestamp: BackupTimestamp,
    ) -> BackupReport {
        let handles: Vec<_> = destinations
            .iter()
            .cloned()
            .map(|destination| {
                let backend = self.backend.clone();
                let volume = volume.to_string();
                let source: PathBuf = source.to_path_buf();
                tokio::spawn(async move {
                    backend
                        .backup(&destination, &volume, &source, timestamp)
                        .await
                })
            })
            .collect();

        let results: Vec<DestinationResult> = join_all(handles)
            .await
            .into_iter()
            .zip(destinations)
            .map(|(joined, destination)| {
                let outcome = match joined {
                    Ok(result) => result,
                    Err(e) => Err(Error::Internal(format!("backup task failed: {}", e))),
                };
                let error = match outcome {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(
                            "Backup of {} to {} failed: {}",
                            volume, destination.repository, e
                        );
                        Some(e.to_string())
                    }
                };
                DestinationResult {
                    repository: destination.repository.clone(),
                    error,
                }
            })
            .collect();

        let report = BackupReport { timestamp, results };
        let failed = report.failed().count();
        if report.all_failed() {
            error!(
                "Backup of {} at {} failed on all {} destinations",
                volume,
                timestamp,
                report.results.len()
            );
        } else {
            info!(
                "Backup of {} at {} finished: {} succeeded, {} failed",
                volume,
                timestamp,
                report.results.len() - failed,
                failed
            );
        }

        report
    }
}
