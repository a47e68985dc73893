//! 单个文件下载：写入临时文件，完成后原子重命名

use crate::error::{Result, SyncError};
use crate::storage::{RemoteFile, Storage};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;
use tracing::debug;

/// 远程文件名必须是单个普通路径组件
pub fn validate_file_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single || name.contains(|c: char| c == '/' || c == '\\') {
        return Err(SyncError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// 同目录下的临时文件，保证 rename 不跨文件系统
///
/// 临时文件名长度固定，不随远程文件名变长
fn temp_path(dest_dir: &Path) -> PathBuf {
    dest_dir.join(format!(".drivesync-{}.part", uuid::Uuid::new_v4().simple()))
}

/// 下载远程文件到 `dest_dir/<name>`，返回写入的字节数
///
/// 只有在数据全部落盘并重命名后才返回成功；任何失败都会删除临时文件，
/// 目标路径不会留下半个文件。
pub async fn download(storage: &dyn Storage, file: &RemoteFile, dest_dir: &Path) -> Result<u64> {
    validate_file_name(&file.name)?;

    let dest_path = dest_dir.join(&file.name);
    let tmp_path = temp_path(dest_dir);

    // 失败时清理临时文件，成功路径上解除
    let guard = scopeguard::guard(tmp_path.clone(), |path| {
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("清理临时文件失败 {}: {}", path.display(), e);
            }
        }
    });

    let stream = storage.open_read(file).await?;
    let mut reader = StreamReader::new(stream);

    let handle = fs::File::create(&tmp_path)
        .await
        .map_err(|e| SyncError::transfer(&file.name, e))?;
    let mut writer = BufWriter::new(handle);

    let bytes = tokio::io::copy(&mut reader, &mut writer)
        .await
        .map_err(|e| SyncError::transfer(&file.name, e))?;

    writer
        .flush()
        .await
        .map_err(|e| SyncError::transfer(&file.name, e))?;
    writer
        .get_ref()
        .sync_all()
        .await
        .map_err(|e| SyncError::transfer(&file.name, e))?;
    drop(writer);

    fs::rename(&tmp_path, &dest_path)
        .await
        .map_err(|e| SyncError::transfer(&file.name, e))?;
    scopeguard::ScopeGuard::into_inner(guard);

    debug!("写入完成: {} ({} 字节)", dest_path.display(), bytes);
    Ok(bytes)
}
