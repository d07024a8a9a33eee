//! 调度层
//!
//! 定时任务调度、任务提交与控制、快速发布编排。执行本身由工作池完成，
//! 这里只负责决定什么时候、以什么优先级把子任务送入队列。

pub mod cron_utils;
pub mod recurring;
pub mod release;
pub mod submitter;
pub mod task_service;

pub use cron_utils::{next_run_after, CronScheduler};
pub use recurring::{RecurringScheduler, ScheduleEntry, SchedulerStats, TriggerCallback};
pub use release::{ReleaseOrchestrator, ReleaseTaskView};
pub use submitter::JobSubmitter;
pub use task_service::{JobStatusView, TaskProgress, TaskService};
