//! 本地目标目录检查

use crate::error::{Result, SyncError};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;

/// 目标文件是否已存在
///
/// “不存在”是正常结果，只有其他 IO 错误才返回 `Access`。
pub async fn destination_exists(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SyncError::access(path, e)),
    }
}

/// 确保目标目录可用
pub async fn ensure_directory(dir: &Path, auto_create: bool) -> Result<()> {
    match fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(SyncError::access(
            dir,
            std::io::Error::new(ErrorKind::Other, "not a directory"),
        )),
        Err(e) if e.kind() == ErrorKind::NotFound && auto_create => {
            tracing::info!("创建本地目录: {}", dir.display());
            fs::create_dir_all(dir)
                .await
                .map_err(|e| SyncError::access(dir, e))
        }
        Err(e) => Err(SyncError::access(dir, e)),
    }
}
