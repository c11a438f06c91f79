use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use ring_export_sync::orchestrator::{Automator, Scheduler};
use ring_export_sync::services::InboxIngestor;
use ring_export_sync::store::StatusStore;
use ring_export_sync::utils::logging;
use ring_export_sync::{ChromiumBackend, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load()?;

    // 初始化日志
    logging::init(&config)?;
    logging::log_startup(&config);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("无法创建数据目录: {}", config.data_dir.display()))?;

    // 状态存储：上次进程崩溃留下的执行中状态重置为 Idle
    let store = Arc::new(StatusStore::open(config.status_file())?);
    if store.reset_in_flight()? {
        info!("🔄 已重置上次遗留的运行状态");
    }

    let backend = Arc::new(ChromiumBackend::new(&config));
    let ingestor = Arc::new(InboxIngestor::new(config.inbox_dir()));
    let automator = Arc::new(Automator::new(
        config.clone(),
        store.clone(),
        backend,
        ingestor,
    ));

    let scheduler = Arc::new(Scheduler::new(automator.clone(), store, &config));
    let scheduler_task = scheduler.spawn();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ 无法监听退出信号: {}", e);
    }

    info!("🛑 收到退出信号，正在关闭...");
    scheduler_task.abort();
    automator.shutdown().await;
    info!("👋 已退出");

    Ok(())
}
