use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::models::{
    JobPayload, JobRecord, JobRecordPatch, JobStatus, NewParentTask, ParentTask, ParentTaskPatch,
    TaskType,
};
use scheduler_core::traits::TaskRepository;
use scheduler_core::{SchedulerError, SchedulerResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use crate::database::MappingHelpers;

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<ParentTask> {
        Ok(ParentTask {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            task_type: MappingHelpers::code(row, "task_type", TaskType::from_code)?,
            cron_expr: row.try_get("cron_expr")?,
            status: MappingHelpers::code(row, "status", JobStatus::from_code)?,
            duration_secs: row.try_get("duration_secs")?,
            task_count: row.try_get("task_count")?,
            execute_count: row.try_get("execute_count")?,
            next_run_time: MappingHelpers::time(row, "next_run_time")?,
            start_time: MappingHelpers::time(row, "start_time")?,
            end_time: MappingHelpers::time(row, "end_time")?,
            remark: row.try_get("remark")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_job(row: &SqliteRow) -> SchedulerResult<JobRecord> {
        let payload: String = row.try_get("payload")?;
        let payload: JobPayload = serde_json::from_str(&payload)?;
        Ok(JobRecord {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            payload,
            status: MappingHelpers::code(row, "status", JobStatus::from_code)?,
            start_time: MappingHelpers::time(row, "start_time")?,
            end_time: MappingHelpers::time(row, "end_time")?,
            duration_secs: row.try_get("duration_secs")?,
            log: row.try_get("log")?,
            log_path: row.try_get("log_path")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self, request), fields(name = %request.name, jobs = request.jobs.len()))]
    async fn create_task(
        &self,
        request: &NewParentTask,
    ) -> SchedulerResult<(ParentTask, Vec<JobRecord>)> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO tasks (name, task_type, cron_expr, status, task_count, remark, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.name)
        .bind(request.task_type.code())
        .bind(&request.cron_expr)
        .bind(JobStatus::Pending.code())
        .bind(request.jobs.len() as i64)
        .bind(&request.remark)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let task_id = result.last_insert_rowid();

        let mut jobs = Vec::with_capacity(request.jobs.len());
        for payload in &request.jobs {
            let result = sqlx::query(
                "INSERT INTO job_records (task_id, payload, status, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(task_id)
            .bind(serde_json::to_string(payload)?)
            .bind(JobStatus::Pending.code())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            jobs.push(JobRecord {
                id: result.last_insert_rowid(),
                task_id,
                payload: payload.clone(),
                status: JobStatus::Pending,
                start_time: None,
                end_time: None,
                duration_secs: 0,
                log: None,
                log_path: None,
                error_message: None,
                created_at: now,
            });
        }

        tx.commit().await?;

        let task = ParentTask {
            id: task_id,
            name: request.name.clone(),
            task_type: request.task_type,
            cron_expr: request.cron_expr.clone(),
            status: JobStatus::Pending,
            duration_secs: 0,
            task_count: jobs.len() as i64,
            execute_count: 0,
            next_run_time: None,
            start_time: None,
            end_time: None,
            remark: request.remark.clone(),
            created_at: now,
        };
        debug!("创建父任务成功: task_id={}, jobs={}", task_id, jobs.len());
        Ok((task, jobs))
    }

    #[instrument(skip(self))]
    async fn get_task(&self, id: i64) -> SchedulerResult<Option<ParentTask>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self, patch))]
    async fn update_task(&self, id: i64, patch: &ParentTaskPatch) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE tasks SET \
                status = COALESCE(?, status), \
                duration_secs = COALESCE(?, duration_secs), \
                start_time = COALESCE(?, start_time), \
                end_time = COALESCE(?, end_time), \
                next_run_time = COALESCE(?, next_run_time) \
             WHERE id = ?",
        )
        .bind(patch.status.map(|s| s.code()))
        .bind(patch.duration_secs)
        .bind(patch.start_time)
        .bind(patch.end_time)
        .bind(patch.next_run_time)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_tasks_by_type(&self, task_type: TaskType) -> SchedulerResult<Vec<ParentTask>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE task_type = ? ORDER BY id")
            .bind(task_type.code())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self))]
    async fn increment_execute_count(&self, id: i64) -> SchedulerResult<()> {
        let result = sqlx::query("UPDATE tasks SET execute_count = execute_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, id: i64) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM job_records WHERE task_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound { id });
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_job(&self, id: i64) -> SchedulerResult<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM job_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self))]
    async fn get_jobs_by_task(&self, task_id: i64) -> SchedulerResult<Vec<JobRecord>> {
        let rows = sqlx::query("SELECT * FROM job_records WHERE task_id = ? ORDER BY id")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    #[instrument(skip(self))]
    async fn find_active_jobs(&self, task_id: i64) -> SchedulerResult<Vec<JobRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM job_records WHERE task_id = ? AND status IN (?, ?) ORDER BY id",
        )
        .bind(task_id)
        .bind(JobStatus::Pending.code())
        .bind(JobStatus::Running.code())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    #[instrument(skip(self, patch))]
    async fn update_job(&self, id: i64, patch: &JobRecordPatch) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE job_records SET \
                status = COALESCE(?, status), \
                start_time = COALESCE(?, start_time), \
                end_time = COALESCE(?, end_time), \
                duration_secs = COALESCE(?, duration_secs), \
                log = COALESCE(?, log), \
                log_path = COALESCE(?, log_path), \
                error_message = COALESCE(?, error_message) \
             WHERE id = ?",
        )
        .bind(patch.status.map(|s| s.code()))
        .bind(patch.start_time)
        .bind(patch.end_time)
        .bind(patch.duration_secs)
        .bind(&patch.log)
        .bind(&patch.log_path)
        .bind(&patch.error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::JobRecordNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim_job(&self, id: i64, start_time: DateTime<Utc>) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE job_records SET status = ?, start_time = ? \
             WHERE id = ? AND status NOT IN (?, ?, ?)",
        )
        .bind(JobStatus::Running.code())
        .bind(start_time)
        .bind(id)
        .bind(JobStatus::Succeeded.code())
        .bind(JobStatus::Failed.code())
        .bind(JobStatus::Cancelled.code())
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() == 1;
        debug!("认领子任务记录: id={}, claimed={}", id, claimed);
        Ok(claimed)
    }
}
