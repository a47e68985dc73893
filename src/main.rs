use drivesync_lib::config::{resolve_config_path, AppConfig};
use drivesync_lib::{logging, Scheduler, SyncService};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = resolve_config_path(std::env::args().nth(1));

    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.log);
    tracing::info!("配置文件: {}", config_path.display());

    if config.folders.is_empty() {
        tracing::warn!("没有配置任何文件夹");
    }

    // 配置加载时已校验
    let schedule = match config.cron() {
        Ok(schedule) => schedule,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let service = SyncService::new(&config, shutdown.child_token());
    let scheduler = Scheduler::new(schedule, Arc::new(service));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("收到退出信号，不再开始新的下载");
            signal.cancel();
        }
    });

    scheduler.run(shutdown).await;
    ExitCode::SUCCESS
}
