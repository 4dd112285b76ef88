/// 卷管理
///
/// 精简池中逻辑卷的存在性、容量与挂载状态管理

pub mod cli;
pub mod driver;
#[cfg(test)]
pub mod fake;
pub mod thin_pool;

pub use cli::LvmCliBackend;
pub use driver::{ThinPool, Volume, VolumeBackend};
pub use thin_pool::{EnsureOutcome, ThinPoolManager, VolumeAction};
