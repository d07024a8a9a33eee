#![allow(dead_code)]

use scheduler_config::WorkerPoolConfig;
use scheduler_core::models::{Job, JobRecord, NewParentTask, ParentTask, Priority};
use scheduler_core::traits::{ExecutionAdapter, TaskRepository};
use scheduler_infrastructure::{InMemoryJobStore, PriorityQueue};
use scheduler_testing_utils::{MockTaskRepository, TestEnv};
use scheduler_worker::{AdapterRegistry, JobLifecycleManager, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct Harness {
    pub repo: MockTaskRepository,
    pub queue: Arc<PriorityQueue>,
    pub pool: Arc<WorkerPool>,
    pub logs: TempDir,
}

pub fn harness(config: WorkerPoolConfig, adapter: Arc<dyn ExecutionAdapter>) -> Harness {
    let repo = MockTaskRepository::new();
    let queue = Arc::new(PriorityQueue::new(
        Arc::new(InMemoryJobStore::new()),
        "test",
        config.max_retries,
    ));
    queue.start();
    let logs = tempfile::tempdir().unwrap();
    let lifecycle = Arc::new(JobLifecycleManager::new(
        Arc::new(repo.clone()),
        logs.path(),
    ));
    let registry = Arc::new(AdapterRegistry::new().with(adapter));
    let pool = Arc::new(WorkerPool::new(config, queue.clone(), registry, lifecycle));
    Harness {
        repo,
        queue,
        pool,
        logs,
    }
}

impl Harness {
    pub async fn create(&self, request: &NewParentTask) -> (ParentTask, Vec<JobRecord>) {
        self.repo.create_task(request).await.unwrap()
    }

    pub async fn enqueue(&self, record: &JobRecord, priority: Priority) {
        let job = Job::new(record.id, record.task_id, record.payload.clone());
        self.queue.enqueue(job, priority, None).await.unwrap();
    }

    /// 等待所有记录进入终态
    pub async fn wait_terminal(&self, ids: &[i64], timeout: Duration) -> bool {
        let repo = self.repo.clone();
        let ids = ids.to_vec();
        TestEnv::wait_for(
            || {
                let repo = repo.clone();
                let ids = ids.clone();
                async move {
                    ids.iter()
                        .all(|id| repo.job(*id).map(|j| j.is_terminal()).unwrap_or(false))
                }
            },
            timeout,
        )
        .await
    }
}
