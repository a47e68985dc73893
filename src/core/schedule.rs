//! 五段式 cron 表达式：分 时 日 月 周

use crate::error::SyncError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone};
use std::str::FromStr;

/// 向后查找下次触发时间的最大天数（覆盖闰年 2 月 29 日）
const SEARCH_DAYS: i64 = 366 * 5;

/// 单个字段允许的取值，按位存储
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    bits: u64,
    /// 字段为 `*` 或 `*/n`
    wildcard: bool,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits & (1 << value) != 0
    }

    fn parse(expr: &str, min: u32, max: u32) -> Result<Self, String> {
        let mut bits = 0u64;
        let mut wildcard = false;

        for part in expr.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| format!("无效的步长: {:?}", part))?;
                    if step == 0 {
                        return Err(format!("步长不能为 0: {:?}", part));
                    }
                    (range, Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if range == "*" {
                wildcard = true;
                (min, max)
            } else if let Some((a, b)) = range.split_once('-') {
                (parse_value(a, min, max)?, parse_value(b, min, max)?)
            } else {
                let start = parse_value(range, min, max)?;
                // `a/n` 表示从 a 开始直到最大值
                (start, if step.is_some() { max } else { start })
            };

            if start > end {
                return Err(format!("无效的范围: {:?}", part));
            }

            let step = step.unwrap_or(1);
            let mut value = start;
            while value <= end {
                bits |= 1 << value;
                value += step;
            }
        }

        Ok(Self { bits, wildcard })
    }
}

fn parse_value(s: &str, min: u32, max: u32) -> Result<u32, String> {
    let value: u32 = s.parse().map_err(|_| format!("无效的数值: {:?}", s))?;
    if value < min || value > max {
        return Err(format!("数值 {} 超出范围 {}-{}", value, min, max));
    }
    Ok(value)
}

/// 解析后的 cron 调度
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
}

impl FromStr for CronSchedule {
    type Err = SyncError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SyncError::Config(format!(
                "cron 表达式需要 5 个字段，实际 {}: {:?}",
                fields.len(),
                expr
            )));
        }

        let field = |i: usize, min: u32, max: u32| {
            FieldSet::parse(fields[i], min, max)
                .map_err(|e| SyncError::Config(format!("cron 表达式 {:?}: {}", expr, e)))
        };

        let mut days_of_week = field(4, 0, 7)?;
        // 7 和 0 都表示周日
        if days_of_week.contains(7) {
            days_of_week.bits |= 1;
        }

        Ok(Self {
            expr: expr.trim().to_string(),
            minutes: field(0, 0, 59)?,
            hours: field(1, 0, 23)?,
            days_of_month: field(2, 1, 31)?,
            months: field(3, 1, 12)?,
            days_of_week,
        })
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expr)
    }
}

impl CronSchedule {
    /// 日期是否匹配；日、周都有限制时满足其一即可
    fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.months.contains(date.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());

        match (self.days_of_month.wildcard, self.days_of_week.wildcard) {
            (true, true) => true,
            (true, false) => dow,
            (false, true) => dom,
            (false, false) => dom || dow,
        }
    }

    /// `after` 之后（不含）的下一次触发时间
    ///
    /// 夏令时跳过的本地时间不会触发；重复的本地时间取较早的一次。
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let local = after.naive_local();
        let start_date = local.date();

        for offset in 0..SEARCH_DAYS {
            let date = start_date + Duration::days(offset);
            if !self.matches_date(date) {
                continue;
            }

            for hour in 0..24u32 {
                if !self.hours.contains(hour) {
                    continue;
                }
                for minute in 0..60u32 {
                    if !self.minutes.contains(minute) {
                        continue;
                    }
                    let Some(time) = NaiveTime::from_hms_opt(hour, minute, 0) else {
                        continue;
                    };
                    let candidate = date.and_time(time);
                    if let Some(instant) = tz.from_local_datetime(&candidate).earliest() {
                        if instant > *after {
                            return Some(instant);
                        }
                    }
                }
            }
        }

        None
    }
}
