//! 定时调度：启动时立即运行一次，之后按 cron 表达式触发

use crate::core::engine::CycleReport;
use crate::core::schedule::CronSchedule;
use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 同步周期的入口
#[async_trait]
pub trait CycleRunner: Send + Sync + 'static {
    async fn run_cycle(&self) -> anyhow::Result<CycleReport>;
}

/// 计算下一次触发时间
///
/// `cursor` 是上一次已触发（或启动）的时间点。提前醒来时从 `cursor` 之后找，
/// 不会重复触发同一时刻；醒得晚时从 `now` 之后找，错过的时刻直接跳过。
pub fn next_fire<Tz: TimeZone>(
    schedule: &CronSchedule,
    cursor: &DateTime<Tz>,
    now: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    let from = if now > cursor { now } else { cursor };
    schedule.next_after(from)
}

/// 调度器
///
/// 同一时间最多运行一个周期；上一个周期未结束时到来的触发直接跳过，
/// 错过的触发不会补跑。
pub struct Scheduler {
    schedule: CronSchedule,
    runner: Arc<dyn CycleRunner>,
    busy: Arc<Mutex<()>>,
}

impl Scheduler {
    pub fn new(schedule: CronSchedule, runner: Arc<dyn CycleRunner>) -> Self {
        Self {
            schedule,
            runner,
            busy: Arc::new(Mutex::new(())),
        }
    }

    /// 触发一次同步周期，上一个周期仍在运行时返回 `None`
    pub fn trigger(&self, reason: &str) -> Option<JoinHandle<()>> {
        let guard = match self.busy.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("上一个同步周期仍在运行，跳过本次触发 ({})", reason);
                return None;
            }
        };

        info!("触发同步周期 ({})", reason);
        let runner = self.runner.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            match runner.run_cycle().await {
                Ok(report) => {
                    let elapsed = report.finished_at - report.started_at;
                    info!(
                        "同步周期结束: 用时 {}s, 下载 {} 个文件",
                        elapsed.num_seconds(),
                        report.files_downloaded()
                    );
                }
                Err(e) => error!("同步周期失败: {:#}", e),
            }
        }))
    }

    /// 运行直到收到停止信号，返回前等待正在进行的周期结束
    pub async fn run(self, shutdown: CancellationToken) {
        info!("调度已启动: {}", self.schedule);
        self.trigger("startup");

        let mut cursor = Local::now();
        loop {
            let now = Local::now();
            let Some(next) = next_fire(&self.schedule, &cursor, &now) else {
                warn!("cron 表达式 {} 没有后续触发时间", self.schedule);
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            debug!("下次同步时间: {}", next);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    self.trigger("schedule");
                }
            }
            cursor = next;
        }

        info!("等待当前同步周期结束...");
        let _idle = self.busy.lock().await;
        info!("调度已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct GatedRunner {
        runs: AtomicUsize,
        started: Notify,
        release: Notify,
        gated: bool,
        fail: bool,
    }

    #[async_trait]
    impl CycleRunner for GatedRunner {
        async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            if self.gated {
                self.release.notified().await;
            }
            if self.fail {
                anyhow::bail!("authorization failed");
            }
            let now = Utc::now();
            Ok(CycleReport {
                reference: now,
                started_at: now,
                finished_at: now,
                folders: Vec::new(),
                cancelled: false,
            })
        }
    }

    fn yearly() -> CronSchedule {
        "0 0 1 1 *".parse().unwrap()
    }

    fn hourly() -> CronSchedule {
        "0 * * * *".parse().unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, h, m, s).unwrap()
    }

    #[test]
    fn test_next_fire_from_startup() {
        let start = at(9, 15, 30);
        assert_eq!(next_fire(&hourly(), &start, &start), Some(at(10, 0, 0)));
    }

    #[test]
    fn test_early_wake_does_not_refire_same_tick() {
        // 10:00 的触发已执行，时钟略慢于定时器
        let cursor = at(10, 0, 0);
        let now = at(9, 59, 59);
        assert_eq!(next_fire(&hourly(), &cursor, &now), Some(at(11, 0, 0)));
    }

    #[test]
    fn test_late_wake_moves_to_following_tick() {
        let cursor = at(10, 0, 0);
        let now = at(10, 0, 2);
        assert_eq!(next_fire(&hourly(), &cursor, &now), Some(at(11, 0, 0)));
    }

    #[test]
    fn test_long_sleep_skips_missed_ticks() {
        let cursor = at(10, 0, 0);
        let now = at(13, 30, 0);
        assert_eq!(next_fire(&hourly(), &cursor, &now), Some(at(14, 0, 0)));
    }

    #[test]
    fn test_successive_ticks_are_hourly() {
        let mut cursor = at(9, 15, 0);
        let mut fired = Vec::new();
        for _ in 0..3 {
            let next = next_fire(&hourly(), &cursor, &cursor).unwrap();
            fired.push(next);
            cursor = next;
        }
        assert_eq!(fired, vec![at(10, 0, 0), at(11, 0, 0), at(12, 0, 0)]);
    }

    #[tokio::test]
    async fn test_tick_skipped_while_cycle_running() {
        let runner = Arc::new(GatedRunner {
            gated: true,
            ..Default::default()
        });
        let scheduler = Scheduler::new(yearly(), runner.clone());

        let first = scheduler.trigger("startup").expect("first trigger runs");
        runner.started.notified().await;
        assert!(scheduler.trigger("schedule").is_none());

        runner.release.notify_one();
        first.await.unwrap();

        let again = scheduler.trigger("schedule").expect("idle again");
        runner.release.notify_one();
        again.await.unwrap();

        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_cycle_does_not_stop_scheduling() {
        let runner = Arc::new(GatedRunner {
            fail: true,
            ..Default::default()
        });
        let scheduler = Scheduler::new(yearly(), runner.clone());

        scheduler.trigger("startup").unwrap().await.unwrap();
        scheduler.trigger("schedule").unwrap().await.unwrap();

        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_starts_immediately_and_stops_on_shutdown() {
        let runner = Arc::new(GatedRunner::default());
        let scheduler = Scheduler::new(yearly(), runner.clone());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(scheduler.run(shutdown.clone()));
        runner.started.notified().await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
    }
}
