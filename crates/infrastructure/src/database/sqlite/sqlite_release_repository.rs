use async_trait::async_trait;
use chrono::Utc;
use scheduler_core::models::{
    ExecutionMode, NewRelease, Release, ReleasePatch, ReleaseStatus, ReleaseTask,
    ReleaseTaskPatch, ReleaseTaskStatus,
};
use scheduler_core::traits::ReleaseRepository;
use scheduler_core::{SchedulerError, SchedulerResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use crate::database::MappingHelpers;

pub struct SqliteReleaseRepository {
    pool: SqlitePool,
}

impl SqliteReleaseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_release(row: &SqliteRow) -> SchedulerResult<Release> {
        let mode: i64 = row.try_get("execution_mode")?;
        Ok(Release {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            status: MappingHelpers::code(row, "status", ReleaseStatus::from_code)?,
            task_count: row.try_get("task_count")?,
            execution_mode: ExecutionMode::from_code(mode),
            start_time: MappingHelpers::time(row, "start_time")?,
            end_time: MappingHelpers::time(row, "end_time")?,
            duration_secs: row.try_get("duration_secs")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<ReleaseTask> {
        Ok(ReleaseTask {
            id: row.try_get("id")?,
            release_id: row.try_get("release_id")?,
            app_name: row.try_get("app_name")?,
            app_code: row.try_get("app_code")?,
            environment: row.try_get("environment")?,
            server_id: row.try_get("server_id")?,
            job_name: row.try_get("job_name")?,
            execute_order: row.try_get("execute_order")?,
            status: MappingHelpers::code(row, "status", ReleaseTaskStatus::from_code)?,
            build_number: row.try_get("build_number")?,
            log_url: row.try_get("log_url")?,
            error_message: row.try_get("error_message")?,
            start_time: MappingHelpers::time(row, "start_time")?,
            end_time: MappingHelpers::time(row, "end_time")?,
            duration_secs: row.try_get("duration_secs")?,
        })
    }
}

#[async_trait]
impl ReleaseRepository for SqliteReleaseRepository {
    #[instrument(skip(self, request), fields(title = %request.title, tasks = request.tasks.len()))]
    async fn create_release(
        &self,
        request: &NewRelease,
    ) -> SchedulerResult<(Release, Vec<ReleaseTask>)> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO releases (title, description, status, task_count, execution_mode, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.title)
        .bind(&request.description)
        .bind(ReleaseStatus::NotDeployed.code())
        .bind(request.tasks.len() as i64)
        .bind(ExecutionMode::default().code())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let release_id = result.last_insert_rowid();

        let mut tasks = Vec::with_capacity(request.tasks.len());
        for (index, task) in request.tasks.iter().enumerate() {
            let execute_order = index as i64 + 1;
            let result = sqlx::query(
                "INSERT INTO release_tasks \
                 (release_id, app_name, app_code, environment, server_id, job_name, execute_order, status) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(release_id)
            .bind(&task.app_name)
            .bind(&task.app_code)
            .bind(&task.environment)
            .bind(task.server_id)
            .bind(&task.job_name)
            .bind(execute_order)
            .bind(ReleaseTaskStatus::NotDeployed.code())
            .execute(&mut *tx)
            .await?;

            tasks.push(ReleaseTask {
                id: result.last_insert_rowid(),
                release_id,
                app_name: task.app_name.clone(),
                app_code: task.app_code.clone(),
                environment: task.environment.clone(),
                server_id: task.server_id,
                job_name: task.job_name.clone(),
                execute_order,
                status: ReleaseTaskStatus::NotDeployed,
                build_number: None,
                log_url: None,
                error_message: None,
                start_time: None,
                end_time: None,
                duration_secs: 0,
            });
        }

        tx.commit().await?;

        let release = Release {
            id: release_id,
            title: request.title.clone(),
            description: request.description.clone(),
            status: ReleaseStatus::NotDeployed,
            task_count: tasks.len() as i64,
            execution_mode: ExecutionMode::default(),
            start_time: None,
            end_time: None,
            duration_secs: 0,
            created_at: now,
        };
        debug!("创建发布成功: release_id={}, tasks={}", release_id, tasks.len());
        Ok((release, tasks))
    }

    #[instrument(skip(self))]
    async fn get_release(&self, id: i64) -> SchedulerResult<Option<Release>> {
        let row = sqlx::query("SELECT * FROM releases WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_release).transpose()
    }

    #[instrument(skip(self, patch))]
    async fn update_release(&self, id: i64, patch: &ReleasePatch) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE releases SET \
                status = COALESCE(?, status), \
                execution_mode = COALESCE(?, execution_mode), \
                start_time = COALESCE(?, start_time), \
                end_time = COALESCE(?, end_time), \
                duration_secs = COALESCE(?, duration_secs) \
             WHERE id = ?",
        )
        .bind(patch.status.map(|s| s.code()))
        .bind(patch.execution_mode.map(|m| m.code()))
        .bind(patch.start_time)
        .bind(patch.end_time)
        .bind(patch.duration_secs)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::ReleaseNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_release(&self, id: i64) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM release_tasks WHERE release_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM releases WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::ReleaseNotFound { id });
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_release_task(&self, id: i64) -> SchedulerResult<Option<ReleaseTask>> {
        let row = sqlx::query("SELECT * FROM release_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self))]
    async fn get_release_tasks(&self, release_id: i64) -> SchedulerResult<Vec<ReleaseTask>> {
        let rows = sqlx::query(
            "SELECT * FROM release_tasks WHERE release_id = ? ORDER BY execute_order, id",
        )
        .bind(release_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self, patch))]
    async fn update_release_task(&self, id: i64, patch: &ReleaseTaskPatch) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE release_tasks SET \
                status = COALESCE(?, status), \
                build_number = COALESCE(?, build_number), \
                log_url = COALESCE(?, log_url), \
                error_message = COALESCE(?, error_message), \
                start_time = COALESCE(?, start_time), \
                end_time = COALESCE(?, end_time), \
                duration_secs = COALESCE(?, duration_secs) \
             WHERE id = ?",
        )
        .bind(patch.status.map(|s| s.code()))
        .bind(patch.build_number)
        .bind(&patch.log_url)
        .bind(&patch.error_message)
        .bind(patch.start_time)
        .bind(patch.end_time)
        .bind(patch.duration_secs)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::ReleaseTaskNotFound { id });
        }
        Ok(())
    }
}
