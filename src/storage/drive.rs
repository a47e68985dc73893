use super::{ByteStream, RemoteFile, Storage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";

const LIST_FIELDS: &str = "nextPageToken, files(id, name, createdTime, modifiedTime)";

/// files.list 响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<RemoteFile>,
}

/// Google Drive v3 存储（只读）
pub struct DriveStorage {
    client: reqwest::Client,
    api_base: String,
    token: String,
    page_size: u32,
    max_pages: u32,
    name: String,
}

impl DriveStorage {
    pub fn new(
        api_base: Option<&str>,
        token: &str,
        page_size: u32,
        max_pages: u32,
    ) -> Result<Self> {
        let api_base = api_base
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();

        // 连接超时 + 读取空闲超时，下载大文件不受总时长限制
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(IO_TIMEOUT_SECS))
            .build()
            .map_err(|e| SyncError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        let name = format!("drive:{}", api_base);

        Ok(Self {
            client,
            api_base,
            token: token.to_string(),
            page_size: page_size.max(1),
            max_pages: max_pages.max(1),
            name,
        })
    }

    async fn list_page(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FileListResponse> {
        let mut query = vec![
            ("q", parents_query(folder_id)),
            ("pageSize", self.page_size.to_string()),
            ("fields", LIST_FIELDS.to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/files", self.api_base))
            .bearer_auth(&self.token)
            .query(&query)
            .timeout(Duration::from_secs(OP_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| SyncError::remote_query(folder_id, e))?;

        let response = response
            .error_for_status()
            .map_err(|e| SyncError::remote_query(folder_id, e))?;

        response
            .json::<FileListResponse>()
            .await
            .map_err(|e| SyncError::remote_query(folder_id, format!("响应解析失败: {}", e)))
    }

    fn media_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.api_base, urlencoding::encode(file_id))
    }
}

/// 构造 `'<id>' in parents` 查询，转义引号和反斜杠
fn parents_query(folder_id: &str) -> String {
    let escaped = folder_id.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}' in parents", escaped)
}

#[async_trait]
impl Storage for DriveStorage {
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<RemoteFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        // 默认只取第一页
        for _ in 0..self.max_pages {
            let page = self.list_page(folder_id, page_token.as_deref()).await?;
            files.extend(page.files);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(files)
    }

    async fn open_read(&self, file: &RemoteFile) -> Result<ByteStream> {
        let response = self
            .client
            .get(self.media_url(&file.id))
            .bearer_auth(&self.token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| SyncError::transfer(&file.name, e))?
            .error_for_status()
            .map_err(|e| SyncError::transfer(&file.name, e))?;

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
