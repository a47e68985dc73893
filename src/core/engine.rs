use crate::config::{FolderMapping, SyncSettings};
use crate::core::local::{destination_exists, ensure_directory};
use crate::core::transfer::{download, validate_file_name};
use crate::core::window::{select_today, RunContext};
use crate::error::Result;
use crate::storage::{RemoteFile, Storage};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 单个文件的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Downloaded { bytes: u64 },
    /// 本地已存在同名文件
    Skipped,
    Failed(String),
}

/// 单个文件夹的同步报告
#[derive(Debug, Clone, Default)]
pub struct FolderReport {
    pub remote_folder_id: String,
    pub local_path: PathBuf,
    pub files_listed: u32,
    pub candidates: u32,
    pub files_downloaded: u32,
    pub files_skipped: u32,
    pub files_failed: u32,
    pub bytes_transferred: u64,
    pub errors: Vec<String>,
}

impl FolderReport {
    fn new(mapping: &FolderMapping) -> Self {
        Self {
            remote_folder_id: mapping.remote_folder_id.clone(),
            local_path: mapping.local_path.clone(),
            ..Default::default()
        }
    }

    fn record(&mut self, name: &str, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Downloaded { bytes } => {
                self.files_downloaded += 1;
                self.bytes_transferred += bytes;
            }
            FileOutcome::Skipped => self.files_skipped += 1,
            FileOutcome::Failed(reason) => {
                self.files_failed += 1;
                self.errors.push(format!("{}: {}", name, reason));
            }
        }
    }

    /// 文件夹级别失败（列表失败、目录不可用）
    pub fn is_failed(&self) -> bool {
        self.files_listed == 0 && !self.errors.is_empty()
    }
}

/// 一个同步周期的报告
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub reference: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub folders: Vec<FolderReport>,
    pub cancelled: bool,
}

impl CycleReport {
    pub fn files_downloaded(&self) -> u32 {
        self.folders.iter().map(|f| f.files_downloaded).sum()
    }

    pub fn files_skipped(&self) -> u32 {
        self.folders.iter().map(|f| f.files_skipped).sum()
    }

    pub fn files_failed(&self) -> u32 {
        self.folders.iter().map(|f| f.files_failed).sum()
    }

    pub fn folders_failed(&self) -> usize {
        self.folders.iter().filter(|f| f.is_failed()).count()
    }
}

/// 同步引擎：远程列表 → 今日过滤 → 本地去重 → 下载
pub struct SyncEngine {
    storage: Arc<dyn Storage>,
    folders: Arc<[FolderMapping]>,
    settings: SyncSettings,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        folders: Arc<[FolderMapping]>,
        settings: SyncSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            storage,
            folders,
            settings,
            cancel,
        }
    }

    /// 运行一个同步周期，时间基准取当前本地零点
    pub async fn run_cycle(&self) -> CycleReport {
        self.run_cycle_with(RunContext::now()).await
    }

    /// 按声明顺序处理所有文件夹，单个文件夹失败不影响后续文件夹
    pub async fn run_cycle_with(&self, ctx: RunContext) -> CycleReport {
        info!(
            "开始同步周期: {} 个文件夹, 基准时间 {}",
            self.folders.len(),
            ctx.reference
        );

        let mut folders = Vec::with_capacity(self.folders.len());
        let mut cancelled = false;

        for mapping in self.folders.iter() {
            if self.cancel.is_cancelled() {
                info!("收到停止信号，跳过剩余文件夹");
                cancelled = true;
                break;
            }

            let report = match self.run_folder(mapping, &ctx).await {
                Ok(report) => report,
                Err(e) => {
                    error!("同步文件夹失败 {}: {}", mapping.remote_folder_id, e);
                    let mut report = FolderReport::new(mapping);
                    report.errors.push(e.to_string());
                    report
                }
            };
            folders.push(report);
        }

        let report = CycleReport {
            reference: ctx.reference,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            folders,
            cancelled: cancelled || self.cancel.is_cancelled(),
        };

        info!(
            "同步周期完成: 下载 {}, 跳过 {}, 失败 {}, 文件夹失败 {}",
            report.files_downloaded(),
            report.files_skipped(),
            report.files_failed(),
            report.folders_failed()
        );

        report
    }

    /// 同步单个文件夹
    ///
    /// 只有列表失败或目标目录不可用才返回错误，单个文件的失败记录在报告中。
    pub async fn run_folder(&self, mapping: &FolderMapping, ctx: &RunContext) -> Result<FolderReport> {
        let mut report = FolderReport::new(mapping);

        let files = self.storage.list_folder(&mapping.remote_folder_id).await?;
        report.files_listed = files.len() as u32;

        if files.is_empty() {
            info!("文件夹 {} 中没有找到文件", mapping.remote_folder_id);
            return Ok(report);
        }

        let candidates = dedup_by_name(select_today(ctx.reference, files));
        report.candidates = candidates.len() as u32;

        if candidates.is_empty() {
            debug!("文件夹 {} 今天没有新文件", mapping.remote_folder_id);
            return Ok(report);
        }

        info!("文件夹 {} 今日文件:", mapping.remote_folder_id);
        for file in &candidates {
            info!("{} ({})", file.name, file.id);
        }

        ensure_directory(&mapping.local_path, self.settings.auto_create_dir).await?;

        for (name, outcome) in self.process_candidates(&mapping.local_path, candidates).await {
            report.record(&name, outcome);
        }

        Ok(report)
    }

    /// 按列表顺序启动，最多 `max_concurrent_transfers` 个同时进行
    ///
    /// 停止信号到达后不再启动新文件，已开始的下载会完成。
    async fn process_candidates(
        &self,
        dest_dir: &Path,
        candidates: Vec<RemoteFile>,
    ) -> Vec<(String, FileOutcome)> {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_transfers.max(1)));
        let mut handles = Vec::with_capacity(candidates.len());

        for file in candidates {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                info!("收到停止信号，不再开始新的下载");
                break;
            };

            let storage = self.storage.clone();
            let dest_dir = dest_dir.to_path_buf();
            let name = file.name.clone();

            let handle = tokio::spawn(async move {
                let outcome = process_file(storage.as_ref(), &file, &dest_dir).await;
                drop(permit);
                outcome
            });
            handles.push((name, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("下载任务异常退出 {}: {}", name, e);
                    FileOutcome::Failed(e.to_string())
                }
            };
            outcomes.push((name, outcome));
        }
        outcomes
    }
}

/// 同一列表中的重名文件只保留第一个，避免两个下载写同一个路径
fn dedup_by_name(files: Vec<RemoteFile>) -> Vec<RemoteFile> {
    let mut seen = HashSet::new();
    files
        .into_iter()
        .filter(|file| {
            let first = seen.insert(file.name.clone());
            if !first {
                warn!("重名文件，忽略: {} ({})", file.name, file.id);
            }
            first
        })
        .collect()
}

/// 检查本地是否存在，不存在则下载
async fn process_file(storage: &dyn Storage, file: &RemoteFile, dest_dir: &Path) -> FileOutcome {
    if let Err(e) = validate_file_name(&file.name) {
        warn!("{}", e);
        return FileOutcome::Failed(e.to_string());
    }

    let dest_path = dest_dir.join(&file.name);
    match destination_exists(&dest_path).await {
        Ok(true) => {
            info!("文件 {} 已存在，跳过下载", file.name);
            FileOutcome::Skipped
        }
        Ok(false) => match download(storage, file, dest_dir).await {
            Ok(bytes) => {
                info!("已下载 {} 到 {}", file.name, dest_dir.display());
                FileOutcome::Downloaded { bytes }
            }
            Err(e) => {
                error!("下载失败: {}", e);
                FileOutcome::Failed(e.to_string())
            }
        },
        Err(e) => {
            warn!("检查本地文件失败: {}", e);
            FileOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::{file, MemoryStorage};
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn ctx() -> RunContext {
        RunContext::at(Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap())
    }

    fn today() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 8, 15, 0).unwrap()
    }

    fn yesterday() -> DateTime<Utc> {
        today() - Duration::days(1)
    }

    fn mapping(id: &str, path: &Path) -> FolderMapping {
        FolderMapping {
            remote_folder_id: id.to_string(),
            local_path: path.to_path_buf(),
        }
    }

    fn engine(storage: MemoryStorage, folders: Vec<FolderMapping>) -> (SyncEngine, Arc<MemoryStorage>) {
        let storage = Arc::new(storage);
        let engine = SyncEngine::new(
            storage.clone(),
            folders.into(),
            SyncSettings::default(),
            CancellationToken::new(),
        );
        (engine, storage)
    }

    fn scenario_storage() -> MemoryStorage {
        MemoryStorage::new()
            .with_file("f", file("1", "a.txt", yesterday(), yesterday()), b"a")
            .with_file("f", file("2", "b.txt", today(), today()), b"bb")
            .with_file("f", file("3", "c.txt", yesterday(), today()), b"ccc")
    }

    #[tokio::test]
    async fn test_selects_created_or_modified_today() {
        let temp = TempDir::new().unwrap();
        let (engine, storage) = engine(scenario_storage(), vec![mapping("f", temp.path())]);

        let report = engine.run_cycle_with(ctx()).await;

        assert_eq!(report.folders[0].files_listed, 3);
        assert_eq!(report.folders[0].candidates, 2);
        assert_eq!(report.files_downloaded(), 2);
        assert_eq!(storage.opened(), vec!["b.txt", "c.txt"]);
        assert!(!temp.path().join("a.txt").exists());
        assert_eq!(std::fs::read(temp.path().join("c.txt")).unwrap(), b"ccc");
    }

    #[tokio::test]
    async fn test_existing_local_file_is_skipped() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("b.txt"), b"local copy").unwrap();
        let (engine, storage) = engine(scenario_storage(), vec![mapping("f", temp.path())]);

        let report = engine.run_cycle_with(ctx()).await;

        assert_eq!(report.files_skipped(), 1);
        assert_eq!(report.files_downloaded(), 1);
        assert_eq!(storage.opened(), vec!["c.txt"]);
        // 已有文件不会被覆盖
        assert_eq!(std::fs::read(temp.path().join("b.txt")).unwrap(), b"local copy");
    }

    #[tokio::test]
    async fn test_second_cycle_transfers_nothing() {
        let temp = TempDir::new().unwrap();
        let (engine, storage) = engine(scenario_storage(), vec![mapping("f", temp.path())]);

        let first = engine.run_cycle_with(ctx()).await;
        let second = engine.run_cycle_with(ctx()).await;

        assert_eq!(first.files_downloaded(), 2);
        assert_eq!(second.files_downloaded(), 0);
        assert_eq!(second.files_skipped(), 2);
        assert_eq!(storage.opened().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_listing_does_not_block_next_folder() {
        let temp = TempDir::new().unwrap();
        let dir_a = temp.path().join("a");
        let dir_b = temp.path().join("b");
        let storage = MemoryStorage::new()
            .with_broken_folder("A")
            .with_file("B", file("9", "report.pdf", today(), today()), b"pdf");
        let (engine, _) = engine(storage, vec![mapping("A", &dir_a), mapping("B", &dir_b)]);

        let report = engine.run_cycle_with(ctx()).await;

        assert_eq!(report.folders.len(), 2);
        assert!(report.folders[0].is_failed());
        assert_eq!(report.folders_failed(), 1);
        assert_eq!(report.folders[1].files_downloaded, 1);
        assert!(dir_b.join("report.pdf").exists());
    }

    #[tokio::test]
    async fn test_failed_transfer_does_not_block_next_file() {
        let temp = TempDir::new().unwrap();
        let storage = MemoryStorage::new()
            .with_file("f", file("x", "x.bin", today(), today()), b"xxxxxxxxxx")
            .with_file("f", file("y", "y.bin", today(), today()), b"yy")
            .with_broken_file("x");
        let (engine, storage) = engine(storage, vec![mapping("f", temp.path())]);

        let report = engine.run_cycle_with(ctx()).await;

        assert_eq!(storage.opened(), vec!["x.bin", "y.bin"]);
        assert_eq!(report.folders[0].files_failed, 1);
        assert_eq!(report.folders[0].files_downloaded, 1);
        assert!(!report.folders[0].is_failed());
        assert!(!temp.path().join("x.bin").exists());
        assert!(temp.path().join("y.bin").exists());
    }

    #[tokio::test]
    async fn test_empty_folder_then_next_folder_runs() {
        let temp = TempDir::new().unwrap();
        let storage = MemoryStorage::new()
            .with_empty_folder("empty")
            .with_file("full", file("1", "n.txt", today(), today()), b"n");
        let (engine, _) = engine(
            storage,
            vec![
                mapping("empty", &temp.path().join("e")),
                mapping("full", &temp.path().join("f")),
            ],
        );

        let report = engine.run_cycle_with(ctx()).await;

        assert_eq!(report.folders[0].files_listed, 0);
        assert!(!report.folders[0].is_failed());
        assert_eq!(report.folders[1].files_downloaded, 1);
        // 空文件夹不会创建本地目录
        assert!(!temp.path().join("e").exists());
    }

    #[tokio::test]
    async fn test_duplicate_names_download_once() {
        let temp = TempDir::new().unwrap();
        let storage = MemoryStorage::new()
            .with_file("f", file("1", "dup.txt", today(), today()), b"first")
            .with_file("f", file("2", "dup.txt", today(), today()), b"second");
        let (engine, storage) = engine(storage, vec![mapping("f", temp.path())]);

        let report = engine.run_cycle_with(ctx()).await;

        assert_eq!(report.folders[0].candidates, 1);
        assert_eq!(storage.opened(), vec!["dup.txt"]);
        assert_eq!(std::fs::read(temp.path().join("dup.txt")).unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_invalid_name_fails_only_that_file() {
        let temp = TempDir::new().unwrap();
        let storage = MemoryStorage::new()
            .with_file("f", file("1", "../escape.txt", today(), today()), b"x")
            .with_file("f", file("2", "ok.txt", today(), today()), b"ok");
        let (engine, _) = engine(storage, vec![mapping("f", temp.path())]);

        let report = engine.run_cycle_with(ctx()).await;

        assert_eq!(report.folders[0].files_failed, 1);
        assert_eq!(report.folders[0].files_downloaded, 1);
        assert!(!temp.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_local_access_error_fails_only_that_file() {
        let temp = TempDir::new().unwrap();
        // 超过文件系统的文件名长度上限，检查本地文件时返回 ENAMETOOLONG
        let too_long = format!("{}.txt", "n".repeat(300));
        let storage = MemoryStorage::new()
            .with_file("f", file("1", &too_long, today(), today()), b"x")
            .with_file("f", file("2", "ok.txt", today(), today()), b"ok");
        let (engine, storage) = engine(storage, vec![mapping("f", temp.path())]);

        let report = engine.run_cycle_with(ctx()).await;

        let folder = &report.folders[0];
        assert_eq!(folder.files_failed, 1);
        assert_eq!(folder.files_downloaded, 1);
        assert!(folder.errors[0].starts_with(&too_long));
        assert_eq!(storage.opened(), vec!["ok.txt"]);
        assert_eq!(std::fs::read(temp.path().join("ok.txt")).unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_missing_dir_without_auto_create_fails_folder() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(
            MemoryStorage::new().with_file("f", file("1", "n.txt", today(), today()), b"n"),
        );
        let engine = SyncEngine::new(
            storage,
            vec![mapping("f", &temp.path().join("missing"))].into(),
            SyncSettings {
                auto_create_dir: false,
                ..Default::default()
            },
            CancellationToken::new(),
        );

        let report = engine.run_cycle_with(ctx()).await;

        assert_eq!(report.folders[0].files_downloaded, 0);
        assert_eq!(report.folders[0].errors.len(), 1);
    }

    #[tokio::test]
    async fn test_parallel_transfers_keep_report_order() {
        let temp = TempDir::new().unwrap();
        let mut storage = MemoryStorage::new();
        for i in 0..8 {
            let name = format!("f{}.txt", i);
            storage = storage.with_file("f", file(&i.to_string(), &name, today(), today()), name.as_bytes());
        }
        let engine = SyncEngine::new(
            Arc::new(storage),
            vec![mapping("f", temp.path())].into(),
            SyncSettings {
                max_concurrent_transfers: 4,
                ..Default::default()
            },
            CancellationToken::new(),
        );

        let report = engine.run_cycle_with(ctx()).await;

        assert_eq!(report.files_downloaded(), 8);
        for i in 0..8 {
            let name = format!("f{}.txt", i);
            assert_eq!(std::fs::read(temp.path().join(&name)).unwrap(), name.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_cancelled_engine_starts_nothing() {
        let temp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let storage = Arc::new(scenario_storage());
        let engine = SyncEngine::new(
            storage.clone(),
            vec![mapping("f", temp.path())].into(),
            SyncSettings::default(),
            cancel,
        );

        let report = engine.run_cycle_with(ctx()).await;

        assert!(report.cancelled);
        assert!(report.folders.is_empty());
        assert!(storage.opened().is_empty());
    }
}
