use super::{ByteStream, RemoteFile, Storage};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio_util::io::ReaderStream;

/// 把本地目录当作远程存储使用，文件夹 ID 即相对 `root` 的子目录
///
/// 适用于挂载的网络盘或测试环境。
pub struct LocalFolderStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalFolderStorage {
    pub fn new(path: &str) -> Result<Self> {
        let base_path = PathBuf::from(path);
        if !base_path.is_dir() {
            return Err(SyncError::Config(format!("本地存储根目录不存在: {}", path)));
        }
        let name = format!("local:{}", path);
        Ok(Self { base_path, name })
    }

    fn resolve_folder(&self, folder_id: &str) -> Result<PathBuf> {
        let relative = Path::new(folder_id.trim_start_matches('/').trim_start_matches('\\'));
        // 不允许跳出根目录
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(SyncError::remote_query(folder_id, "invalid folder id"));
        }
        Ok(self.base_path.join(relative))
    }
}

fn system_time(time: std::io::Result<std::time::SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

#[async_trait]
impl Storage for LocalFolderStorage {
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<RemoteFile>> {
        let dir = self.resolve_folder(folder_id)?;
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| SyncError::remote_query(folder_id, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SyncError::remote_query(folder_id, e))?
        {
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!("读取元数据失败，跳过: {:?} - {}", entry.path(), e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            let modified = system_time(metadata.modified()).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            // 部分文件系统不记录创建时间，退回修改时间
            let created = system_time(metadata.created()).unwrap_or(modified);

            files.push(RemoteFile {
                id: format!("{}/{}", folder_id.trim_end_matches('/'), name),
                name,
                created_time: created,
                modified_time: modified,
            });
        }

        // read_dir 顺序不确定，按名称排序保证列表稳定
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn open_read(&self, file: &RemoteFile) -> Result<ByteStream> {
        let path = self
            .resolve_folder(&file.id)
            .map_err(|e| SyncError::transfer(&file.name, e))?;
        let handle = fs::File::open(&path)
            .await
            .map_err(|e| SyncError::transfer(&file.name, e))?;
        Ok(Box::pin(ReaderStream::new(handle)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
