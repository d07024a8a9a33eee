pub mod sqlite_release_repository;
pub mod sqlite_task_repository;

pub use sqlite_release_repository::SqliteReleaseRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
