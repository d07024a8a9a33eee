//! 记录存储接口
//!
//! - `TaskRepository` - 父任务与子任务记录
//! - `ReleaseRepository` - 发布与发布任务
//!
//! 多行创建必须是原子的：要么全部可见，要么全部不可见。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    JobRecord, JobRecordPatch, NewParentTask, NewRelease, ParentTask, ParentTaskPatch, Release,
    ReleasePatch, ReleaseTask, ReleaseTaskPatch, TaskType,
};
use crate::Result;

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 原子地创建父任务及其全部子任务记录
    async fn create_task(&self, request: &NewParentTask) -> Result<(ParentTask, Vec<JobRecord>)>;

    async fn get_task(&self, id: i64) -> Result<Option<ParentTask>>;

    async fn update_task(&self, id: i64, patch: &ParentTaskPatch) -> Result<()>;

    async fn list_tasks_by_type(&self, task_type: TaskType) -> Result<Vec<ParentTask>>;

    /// 执行次数加一
    async fn increment_execute_count(&self, id: i64) -> Result<()>;

    /// 级联删除子任务记录
    async fn delete_task(&self, id: i64) -> Result<()>;

    async fn get_job(&self, id: i64) -> Result<Option<JobRecord>>;

    async fn get_jobs_by_task(&self, task_id: i64) -> Result<Vec<JobRecord>>;

    /// 父任务下所有非终态子任务
    async fn find_active_jobs(&self, task_id: i64) -> Result<Vec<JobRecord>>;

    async fn update_job(&self, id: i64, patch: &JobRecordPatch) -> Result<()>;

    /// 仅当记录不是终态时标记为运行中；返回是否成功认领
    async fn claim_job(&self, id: i64, start_time: DateTime<Utc>) -> Result<bool>;
}

#[async_trait]
pub trait ReleaseRepository: Send + Sync {
    /// 原子地创建发布及其按顺序排列的发布任务
    async fn create_release(&self, request: &NewRelease) -> Result<(Release, Vec<ReleaseTask>)>;

    async fn get_release(&self, id: i64) -> Result<Option<Release>>;

    async fn update_release(&self, id: i64, patch: &ReleasePatch) -> Result<()>;

    async fn delete_release(&self, id: i64) -> Result<()>;

    async fn get_release_task(&self, id: i64) -> Result<Option<ReleaseTask>>;

    async fn get_release_tasks(&self, release_id: i64) -> Result<Vec<ReleaseTask>>;

    async fn update_release_task(&self, id: i64, patch: &ReleaseTaskPatch) -> Result<()>;
}
