/// Restic CSI - Node Agent
///
/// 节点代理程序：管理精简池中的卷，发布时从备份恢复，撤销发布时备份到所有仓库

use std::sync::Arc;
use tracing::info;

use csi_agent::command::CommandRunner;
use csi_agent::config::Config;
use csi_agent::lvm::{LvmCliBackend, ThinPoolManager, VolumeBackend};
use csi_agent::publish::{PublishSettings, PublishUnpublishController};
use csi_agent::repository::{RepositoryBackend, ResticBackend};
use csi_agent::ws::{RpcHandlerRegistry, WsClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    // 可以通过环境变量 RUST_LOG 设置日志级别，例如：
    // RUST_LOG=csi_agent=debug
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    info!("Starting Restic CSI agent...");

    // 加载配置
    dotenvy::dotenv().ok();
    let cfg = Config::from_env()?;
    info!(
        "Loaded {:?}: pool {}, staging {:?}, {} destinations",
        cfg.config_file,
        cfg.volume_info.thin_pool_name,
        cfg.volume_info.staging_path,
        cfg.destinations.len()
    );

    let volumes: Arc<dyn VolumeBackend> = Arc::new(LvmCliBackend::new(CommandRunner::new(
        cfg.volume_info.volume_command_timeout(),
    )));
    let repository: Arc<dyn RepositoryBackend> = Arc::new(ResticBackend::new(
        CommandRunner::new(cfg.volume_info.repository_command_timeout()),
        cfg.node_id.clone(),
    ));

    info!("Repository backend: {}", repository.backend_type());

    let pool = Arc::new(ThinPoolManager::open(&cfg.volume_info.thin_pool_name, volumes.clone()).await?);

    let controller = Arc::new(PublishUnpublishController::new(
        pool,
        volumes,
        repository,
        PublishSettings {
            staging_path: cfg.volume_info.staging_path.clone(),
            default_volume_size: cfg.volume_info.default_volume_size,
            restore_policy: cfg.volume_info.restore_policy,
            destinations: cfg.destinations.clone(),
        },
    ));

    let handler_registry = Arc::new(RpcHandlerRegistry::new(controller));

    let ws_client = WsClient::new(
        cfg.server_ws_url.clone(),
        cfg.node_id.clone(),
        cfg.hostname.clone(),
        handler_registry,
    );

    info!("Node {} connecting to {}", cfg.node_id, cfg.server_ws_url);

    // 运行 WebSocket 客户端（会自动重连）
    ws_client.run().await.map_err(|e| anyhow::anyhow!("{}", e))?;

    Ok(())
}
