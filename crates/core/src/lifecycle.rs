//! 生命周期规则：状态流转、父任务聚合、进度估算

use chrono::{DateTime, Utc};

use crate::models::{JobRecord, JobStatus, ReleaseStatus, ReleaseTask, ReleaseTaskStatus, TaskType};

/// 默认预估执行时长（秒），用于进度插值
pub const DEFAULT_TYPICAL_DURATION_SECS: i64 = 300;

impl JobStatus {
    /// 状态流转是否合法
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Running) | (Pending, Cancelled) | (Pending, Failed) => true,
            (Running, Succeeded) | (Running, Failed) | (Running, Cancelled) => true,
            // 重试时回到等待中
            (Running, Pending) => true,
            // 定时父任务重置子任务
            (Succeeded, Pending) | (Failed, Pending) => true,
            (Running, Paused) | (Pending, Paused) | (Paused, Running) | (Paused, Failed) => true,
            (a, b) => *a == b,
        }
    }
}

/// 父任务聚合结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentAggregate {
    pub status: JobStatus,
    /// 子任务耗时之和
    pub duration_secs: i64,
    /// 定时任务需要把子任务重置为等待中
    pub reset_children: bool,
}

/// 只有全部子任务进入终态时才返回聚合结果
pub fn aggregate_parent(task_type: TaskType, children: &[JobRecord]) -> Option<ParentAggregate> {
    if children.is_empty() || children.iter().any(|c| !c.is_terminal()) {
        return None;
    }

    let duration_secs = children.iter().map(|c| c.duration_secs.max(0)).sum();

    if task_type == TaskType::Scheduled {
        return Some(ParentAggregate {
            status: JobStatus::Running,
            duration_secs,
            reset_children: true,
        });
    }

    let all_succeeded = children.iter().all(|c| c.status == JobStatus::Succeeded);
    Some(ParentAggregate {
        status: if all_succeeded {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        },
        duration_secs,
        reset_children: false,
    })
}

/// 发布聚合：全部发布任务终态后给出最终状态与总耗时
pub fn aggregate_release(tasks: &[ReleaseTask]) -> Option<(ReleaseStatus, i64)> {
    if tasks.is_empty() || tasks.iter().any(|t| !t.status.is_terminal()) {
        return None;
    }
    let duration: i64 = tasks.iter().map(|t| t.duration_secs.max(0)).sum();
    let status = if tasks.iter().all(|t| t.status == ReleaseTaskStatus::Succeeded) {
        ReleaseStatus::Succeeded
    } else {
        ReleaseStatus::Failed
    };
    Some((status, duration))
}

/// 进度估算（仅供参考）
///
/// 等待中为0，运行中在 [10, 90] 区间内按预估时长线性插值，终态为100。
pub fn estimate_progress(
    running: bool,
    terminal: bool,
    start_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    typical_duration_secs: i64,
) -> u8 {
    if terminal {
        return 100;
    }
    if !running {
        return 0;
    }
    let Some(start) = start_time else {
        return 10;
    };
    if start > now || typical_duration_secs <= 0 {
        return 10;
    }
    let elapsed = (now - start).num_milliseconds() as f64 / 1000.0;
    if elapsed < 0.0 {
        return 10;
    }
    let ratio = elapsed / typical_duration_secs as f64;
    let progress = (ratio * 80.0) as i64 + 10;
    progress.clamp(10, 90) as u8
}

pub fn job_progress(
    status: JobStatus,
    start_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    typical_duration_secs: i64,
) -> u8 {
    estimate_progress(
        status == JobStatus::Running,
        status.is_terminal(),
        start_time,
        now,
        typical_duration_secs,
    )
}

pub fn release_task_progress(
    status: ReleaseTaskStatus,
    start_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    typical_duration_secs: i64,
) -> u8 {
    match status {
        // 取消的任务从未执行
        ReleaseTaskStatus::Cancelled => 0,
        _ => estimate_progress(
            status == ReleaseTaskStatus::Deploying,
            status.is_terminal(),
            start_time,
            now,
            typical_duration_secs,
        ),
    }
}
