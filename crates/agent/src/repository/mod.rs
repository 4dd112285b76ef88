/// 备份仓库模块

pub mod coordinator;
pub mod driver;
#[cfg(test)]
pub mod fake;
pub mod restic;
pub mod selector;

pub use coordinator::{BackupCoordinator, BackupReport, DestinationResult};
pub use driver::{Destination, RepositoryBackend, SnapshotDescriptor};
pub use restic::ResticBackend;
pub use selector::{DestinationSelector, SnapshotMatch};
