//! 同步错误类型

use thiserror::Error;

/// 同步过程中可能出现的错误
///
/// 每种错误只影响产生它的最小单元：`RemoteQuery` 中止单个文件夹，
/// `Access` / `Transfer` / `InvalidName` 中止单个文件。
#[derive(Debug, Error)]
pub enum SyncError {
    /// 列出远程文件夹失败（网络、认证、API 错误）
    #[error("远程查询失败 [{folder}]: {message}")]
    RemoteQuery { folder: String, message: String },

    /// 本地文件系统访问失败（不包括“文件不存在”）
    #[error("本地访问失败 {path}: {source}")]
    Access {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 下载文件失败
    #[error("传输失败 {name}: {message}")]
    Transfer { name: String, message: String },

    /// 远程文件名不能作为本地文件名使用
    #[error("非法文件名: {0:?}")]
    InvalidName(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),
}

impl SyncError {
    pub fn remote_query(folder: &str, message: impl std::fmt::Display) -> Self {
        SyncError::RemoteQuery {
            folder: folder.to_string(),
            message: message.to_string(),
        }
    }

    pub fn access(path: &std::path::Path, source: std::io::Error) -> Self {
        SyncError::Access {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn transfer(name: &str, message: impl std::fmt::Display) -> Self {
        SyncError::Transfer {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
