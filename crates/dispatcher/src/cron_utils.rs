use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::warn;

use scheduler_core::{SchedulerError, SchedulerResult};

/// 5段表达式（分 时 日 月 周）补上秒字段，6/7段原样返回
pub fn normalize_expression(cron_expr: &str) -> String {
    let trimmed = cron_expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// CRON表达式解析和调度工具
#[derive(Debug, Clone)]
pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(cron_expr: &str) -> SchedulerResult<Self> {
        let normalized = normalize_expression(cron_expr);
        if normalized.is_empty() {
            return Err(SchedulerError::InvalidCron {
                expr: cron_expr.to_string(),
                message: "表达式为空".to_string(),
            });
        }
        let schedule = Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expression: cron_expr.trim().to_string(),
            schedule,
        })
    }

    /// 用户提交的原始表达式
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 严格晚于 `from` 的下一次触发时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    pub fn validate_cron_expression(cron_expr: &str) -> SchedulerResult<()> {
        Self::new(cron_expr).map(|_| ())
    }

    /// 距离下一次触发的时长
    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_execution_time(now).map(|next| next - now)
    }
}

/// 解析失败或没有后续触发时间时返回 `None`
pub fn next_run_after(cron_expr: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match CronScheduler::new(cron_expr) {
        Ok(scheduler) => scheduler.next_execution_time(from),
        Err(e) => {
            warn!("计算下次执行时间失败: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_expression() {
        assert_eq!(normalize_expression("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_expression(" 0 0 * * * * "), "0 0 * * * *");
        assert_eq!(normalize_expression("0 0 0 1 1 * 2030"), "0 0 0 1 1 * 2030");
    }

    #[test]
    fn test_empty_expression_is_rejected() {
        assert!(matches!(
            CronScheduler::new("   "),
            Err(SchedulerError::InvalidCron { .. })
        ));
    }
}
