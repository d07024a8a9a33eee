//! # 数据模型
//!
//! 任务编排引擎的核心数据结构。
//!
//! ## 核心模型
//!
//! ### Job / QueuedJob - 执行单元
//! 入队的最小执行单元。`QueuedJob` 是它在任务存储中的序列化形式，
//! 字段名固定为 `job, priority, retryCount, maxRetries, enqueuedAt, metadata`。
//!
//! ### ParentTask / JobRecord - 父任务与子任务记录
//! 一个父任务对应一批一起创建的子任务记录（立即执行、定时、批量）。
//! 子任务记录在入队前创建，并在每次状态流转时更新。
//!
//! ### Release / ReleaseTask - 快速发布
//! 一组按执行顺序排列的构建任务，支持并行或串行执行。
//!
//! ## 状态流转
//!
//! ```text
//! Pending → Running → Succeeded
//!    ↓         ↓    ↘ Failed
//! Cancelled  Cancelled
//! ```
//!
//! `Paused` 只用于定时父任务，冻结触发但不影响已派发的子任务。
//!
//! ## 部分更新
//!
//! 所有实体的更新都通过带可选字段的 patch 结构完成，
//! 例如 [`JobRecordPatch`]、[`ParentTaskPatch`]、[`ReleaseTaskPatch`]。

pub mod job;
pub mod metrics;
pub mod release;
pub mod target;
pub mod task;

pub use job::*;
pub use metrics::*;
pub use release::*;
pub use target::*;
pub use task::*;
