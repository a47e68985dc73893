//! 应用配置模块

use crate::core::schedule::CronSchedule;
use crate::error::{Result, SyncError};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 访问令牌环境变量
pub const ACCESS_TOKEN_ENV: &str = "DRIVESYNC_ACCESS_TOKEN";
/// 配置文件路径环境变量
pub const CONFIG_PATH_ENV: &str = "DRIVESYNC_CONFIG";
/// files.list 允许的最大 pageSize
pub const MAX_PAGE_SIZE: u32 = 1000;

/// 远程文件夹与本地目录的对应关系
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderMapping {
    pub remote_folder_id: String,
    pub local_path: PathBuf,
}

/// 存储类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Drive,
    Local,
}

/// 远程存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub typ: StorageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// 令牌文件，每个周期重新读取
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// 本地存储根目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// 最多读取的列表页数，默认只取第一页
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_page_size() -> u32 {
    10
}

fn default_max_pages() -> u32 {
    1
}

impl StorageConfig {
    /// 按 `accessToken` → 环境变量 → `tokenFile` 的顺序取访问令牌
    pub async fn resolve_access_token(&self) -> Result<String> {
        self.resolve_access_token_with(std::env::var(ACCESS_TOKEN_ENV).ok())
            .await
    }

    async fn resolve_access_token_with(&self, env_token: Option<String>) -> Result<String> {
        if let Some(token) = self.access_token.as_ref().filter(|t| !t.trim().is_empty()) {
            return Ok(token.trim().to_string());
        }

        if let Some(token) = env_token.filter(|t| !t.trim().is_empty()) {
            return Ok(token.trim().to_string());
        }

        if let Some(path) = &self.token_file {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| SyncError::Config(format!("读取令牌文件失败 {:?}: {}", path, e)))?;
            let token = content.trim();
            if !token.is_empty() {
                return Ok(token.to_string());
            }
            return Err(SyncError::Config(format!("令牌文件为空: {:?}", path)));
        }

        Err(SyncError::Config(
            "drive storage requires accessToken, tokenFile or DRIVESYNC_ACCESS_TOKEN".to_string(),
        ))
    }
}

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// 每个文件夹内的最大并发下载数，1 表示逐个下载
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    /// 本地目录不存在时是否自动创建
    #[serde(default = "default_auto_create_dir")]
    pub auto_create_dir: bool,
}

fn default_max_concurrent_transfers() -> usize {
    1
}

fn default_auto_create_dir() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent_transfers(),
            auto_create_dir: default_auto_create_dir(),
        }
    }
}

/// 整体配置文件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub folders: Vec<FolderMapping>,
    /// 五段式 cron 表达式：分 时 日 月 周
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_schedule() -> String {
    "0 * * * *".to_string() // 每小时整点
}

impl AppConfig {
    /// 从 JSON 文件加载配置
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("读取配置文件失败 {:?}: {}", path, e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(content)
            .map_err(|e| SyncError::Config(format!("配置文件格式错误: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.cron()?;

        for folder in &self.folders {
            if folder.remote_folder_id.trim().is_empty() {
                return Err(SyncError::Config("remoteFolderId 不能为空".to_string()));
            }
            if folder.local_path.as_os_str().is_empty() {
                return Err(SyncError::Config(format!(
                    "文件夹 {} 缺少 localPath",
                    folder.remote_folder_id
                )));
            }
        }

        if self.sync.max_concurrent_transfers == 0 {
            return Err(SyncError::Config(
                "maxConcurrentTransfers 必须大于 0".to_string(),
            ));
        }

        if self.storage.page_size == 0 || self.storage.page_size > MAX_PAGE_SIZE {
            return Err(SyncError::Config(format!(
                "pageSize 必须在 1 到 {} 之间",
                MAX_PAGE_SIZE
            )));
        }

        if self.storage.typ == StorageType::Local && self.storage.root.is_none() {
            return Err(SyncError::Config("local storage requires root".to_string()));
        }

        Ok(())
    }

    /// 解析调度表达式
    pub fn cron(&self) -> Result<CronSchedule> {
        self.schedule.parse()
    }
}

/// 确定配置文件路径：命令行参数 → 环境变量 → 默认配置目录
pub fn resolve_config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| default_config_dir().join("config.json"))
}

/// 默认配置目录
pub fn default_config_dir() -> PathBuf {
    crate::dirs::config_dir()
        .map(|p| p.join("drivesync"))
        .unwrap_or_else(|| PathBuf::from(".drivesync"))
}
