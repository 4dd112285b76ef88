/// Restic CSI - Node Agent 库
///
/// 精简池卷管理、备份仓库访问、发布 / 撤销发布流程与 RPC 接入

pub mod command;
pub mod config;
pub mod lvm;
pub mod publish;
pub mod repository;
pub mod ws;
