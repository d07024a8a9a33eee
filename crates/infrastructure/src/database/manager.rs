use scheduler_config::DatabaseConfig;
use scheduler_core::SchedulerResult;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{SqliteReleaseRepository, SqliteTaskRepository};

pub type DbPool = Pool<Sqlite>;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        task_type INTEGER NOT NULL,
        cron_expr TEXT,
        status INTEGER NOT NULL DEFAULT 1,
        duration_secs INTEGER NOT NULL DEFAULT 0,
        task_count INTEGER NOT NULL DEFAULT 0,
        execute_count INTEGER NOT NULL DEFAULT 0,
        next_run_time DATETIME,
        start_time DATETIME,
        end_time DATETIME,
        remark TEXT,
        created_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS job_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL,
        payload TEXT NOT NULL,
        status INTEGER NOT NULL DEFAULT 1,
        start_time DATETIME,
        end_time DATETIME,
        duration_secs INTEGER NOT NULL DEFAULT 0,
        log TEXT,
        log_path TEXT,
        error_message TEXT,
        created_at DATETIME NOT NULL,
        FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS releases (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        description TEXT,
        status INTEGER NOT NULL DEFAULT 1,
        task_count INTEGER NOT NULL DEFAULT 0,
        execution_mode INTEGER NOT NULL DEFAULT 1,
        start_time DATETIME,
        end_time DATETIME,
        duration_secs INTEGER NOT NULL DEFAULT 0,
        created_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS release_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        release_id INTEGER NOT NULL,
        app_name TEXT NOT NULL,
        app_code TEXT NOT NULL,
        environment TEXT NOT NULL,
        server_id INTEGER NOT NULL,
        job_name TEXT NOT NULL,
        execute_order INTEGER NOT NULL,
        status INTEGER NOT NULL DEFAULT 1,
        build_number INTEGER,
        log_url TEXT,
        error_message TEXT,
        start_time DATETIME,
        end_time DATETIME,
        duration_secs INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (release_id) REFERENCES releases(id) ON DELETE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tasks_task_type ON tasks(task_type)",
    "CREATE INDEX IF NOT EXISTS idx_job_records_task_id ON job_records(task_id)",
    "CREATE INDEX IF NOT EXISTS idx_job_records_status ON job_records(status)",
    "CREATE INDEX IF NOT EXISTS idx_release_tasks_release_id ON release_tasks(release_id)",
];

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        info!("连接SQLite数据库: {}", config.url);
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800)) // 30分钟默认生命周期
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// 单连接内存数据库，表结构已创建
    pub async fn in_memory() -> SchedulerResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // 内存库随连接销毁，必须固定为单个长连接
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let manager = Self { pool };
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> SchedulerResult<()> {
        debug!("创建数据库表结构");
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn task_repository(&self) -> SqliteTaskRepository {
        SqliteTaskRepository::new(self.pool.clone())
    }

    pub fn release_repository(&self) -> SqliteReleaseRepository {
        SqliteReleaseRepository::new(self.pool.clone())
    }
}
