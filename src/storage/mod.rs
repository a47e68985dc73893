pub mod drive;
pub mod local;

use crate::config::{StorageConfig, StorageType};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;

pub use drive::DriveStorage;
pub use local::LocalFolderStorage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- 列表等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- 下载流
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程文件元数据
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub id: String,
    /// 同时作为本地文件名和去重键
    pub name: String,
    pub created_time: DateTime<Utc>,
    pub modified_time: DateTime<Utc>,
}

/// 远程文件内容流
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// 远程存储抽象接口（只读）
#[async_trait]
pub trait Storage: Send + Sync {
    /// 列出文件夹下的直接子文件
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<RemoteFile>>;

    /// 打开文件内容流
    async fn open_read(&self, file: &RemoteFile) -> Result<ByteStream>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建存储实例
///
/// 每个同步周期调用一次，Drive 的访问令牌在这里重新读取。
pub async fn create_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    match config.typ {
        StorageType::Drive => {
            let token = config.resolve_access_token().await?;
            let storage = DriveStorage::new(
                config.api_base.as_deref(),
                &token,
                config.page_size,
                config.max_pages,
            )?;
            tracing::debug!("初始化 Drive 存储: {}", storage.name());
            Ok(Arc::new(storage) as Arc<dyn Storage>)
        }
        StorageType::Local => {
            let root = config
                .root
                .as_ref()
                .ok_or_else(|| SyncError::Config("local storage requires root".to_string()))?;
            tracing::debug!("初始化本地存储: {}", root);
            Ok(Arc::new(LocalFolderStorage::new(root)?) as Arc<dyn Storage>)
        }
    }
}
