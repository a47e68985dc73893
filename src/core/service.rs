use crate::config::{AppConfig, FolderMapping, StorageConfig, SyncSettings};
use crate::core::engine::{CycleReport, SyncEngine};
use crate::core::scheduler::CycleRunner;
use crate::storage::create_storage;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 每个周期重新建立远程连接，然后交给 `SyncEngine`
pub struct SyncService {
    storage: StorageConfig,
    folders: Arc<[FolderMapping]>,
    settings: SyncSettings,
    cancel: CancellationToken,
}

impl SyncService {
    pub fn new(config: &AppConfig, cancel: CancellationToken) -> Self {
        Self {
            storage: config.storage.clone(),
            folders: config.folders.clone().into(),
            settings: config.sync.clone(),
            cancel,
        }
    }
}

#[async_trait]
impl CycleRunner for SyncService {
    async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
        let storage = create_storage(&self.storage)
            .await
            .context("连接远程存储失败")?;
        info!("使用存储: {}", storage.name());

        let engine = SyncEngine::new(
            storage,
            self.folders.clone(),
            self.settings.clone(),
            self.cancel.clone(),
        );
        Ok(engine.run_cycle().await)
    }
}
