//! “今天”时间窗口过滤

use crate::storage::RemoteFile;
use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone, Utc};

/// 一个同步周期共享的运行上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    /// 周期开始当天的本地零点
    pub reference: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn now() -> Self {
        Self::at(Local::now())
    }

    pub fn at<Tz: TimeZone>(now: DateTime<Tz>) -> Self {
        Self {
            reference: local_midnight(&now),
            started_at: now.with_timezone(&Utc),
        }
    }
}

/// `now` 所在时区当天零点
///
/// 零点因夏令时不存在时，取当天第一个有效时刻。
pub fn local_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Utc> {
    let tz = now.timezone();
    let date = now.date_naive();

    let mut candidate = date.and_time(NaiveTime::MIN);
    // 夏令时跳变最多一小时，按分钟向后找足够
    for _ in 0..=180 {
        if let Some(instant) = tz.from_local_datetime(&candidate).earliest() {
            return instant.with_timezone(&Utc);
        }
        candidate += Duration::minutes(1);
    }
    now.with_timezone(&Utc)
}

/// 今天创建或修改过的文件
pub fn is_today(reference: DateTime<Utc>, file: &RemoteFile) -> bool {
    file.created_time >= reference || file.modified_time >= reference
}

/// 保留今天创建或修改过的文件，顺序不变
pub fn select_today(reference: DateTime<Utc>, files: Vec<RemoteFile>) -> Vec<RemoteFile> {
    files
        .into_iter()
        .filter(|file| is_today(reference, file))
        .collect()
}
