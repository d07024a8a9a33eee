pub mod manager;
pub mod sqlite;

pub use manager::{DatabaseManager, DbPool};
pub use sqlite::{SqliteReleaseRepository, SqliteTaskRepository};

use chrono::{DateTime, Utc};
use scheduler_core::{SchedulerError, SchedulerResult};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// 行映射辅助
pub(crate) struct MappingHelpers;

impl MappingHelpers {
    pub fn code<T>(row: &SqliteRow, column: &str, decode: fn(i64) -> Option<T>) -> SchedulerResult<T> {
        let code: i64 = row.try_get(column)?;
        decode(code).ok_or_else(|| {
            SchedulerError::Internal(format!("未知的状态码: column={column}, code={code}"))
        })
    }

    pub fn time(row: &SqliteRow, column: &str) -> SchedulerResult<Option<DateTime<Utc>>> {
        Ok(row.try_get(column)?)
    }
}
