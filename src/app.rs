use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use scheduler_config::AppConfig;
use scheduler_core::traits::{BuildSystem, ReleaseRepository, TargetResolver, TaskRepository};
use scheduler_dispatcher::{
    next_run_after, JobSubmitter, RecurringScheduler, ReleaseOrchestrator, TaskService,
};
use scheduler_infrastructure::{
    DatabaseManager, JobStoreFactory, PriorityQueue, StaticTargetResolver,
};
use scheduler_worker::{
    AdapterRegistry, JenkinsAdapter, JenkinsClient, JobLifecycleManager, NextRunResolver,
    OpenSshShell, SshAdapter, WorkerPool,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 组装好的进程内组件
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    queue: Arc<PriorityQueue>,
    pool: Arc<WorkerPool>,
    scheduler: Arc<RecurringScheduler>,
    tasks: Arc<TaskService>,
    releases: Arc<ReleaseOrchestrator>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("创建数据库表结构失败")?;
        let task_repo: Arc<dyn TaskRepository> = Arc::new(database.task_repository());
        let release_repo: Arc<dyn ReleaseRepository> = Arc::new(database.release_repository());

        let store = JobStoreFactory::create(&config.job_store)
            .await
            .context("创建任务存储失败")?;
        let queue = Arc::new(PriorityQueue::new(
            store,
            config.job_store.key_prefix.clone(),
            config.worker_pool.max_retries,
        ));

        let resolver: Arc<dyn TargetResolver> =
            Arc::new(StaticTargetResolver::from_config(&config.targets));
        let jenkins: Arc<dyn BuildSystem> = Arc::new(
            JenkinsClient::new(config.jenkins.clone()).context("创建Jenkins客户端失败")?,
        );
        let adapters = Arc::new(
            AdapterRegistry::new()
                .with(Arc::new(SshAdapter::new(
                    Arc::new(OpenSshShell::new(&config.ssh)),
                    resolver.clone(),
                    config.ssh.clone(),
                )))
                .with(Arc::new(JenkinsAdapter::new(jenkins.clone(), resolver.clone()))),
        );

        let next_run: NextRunResolver = Arc::new(|expr| next_run_after(expr, Utc::now()));
        let lifecycle = Arc::new(
            JobLifecycleManager::new(task_repo.clone(), config.ssh.log_dir.clone())
                .with_next_run_resolver(next_run),
        );
        let pool = Arc::new(WorkerPool::new(
            config.worker_pool.clone(),
            queue.clone(),
            adapters.clone(),
            lifecycle,
        ));

        let scheduler = Arc::new(RecurringScheduler::new(task_repo.clone()));
        let submitter = Arc::new(JobSubmitter::new(task_repo.clone(), queue.clone()));
        let tasks = Arc::new(TaskService::new(
            task_repo,
            resolver.clone(),
            submitter,
            scheduler.clone(),
            adapters,
            config.release.typical_duration_seconds as i64,
        ));
        let releases = Arc::new(ReleaseOrchestrator::new(
            release_repo,
            jenkins,
            resolver,
            config.release.clone(),
        ));

        Ok(Self {
            config,
            database,
            queue,
            pool,
            scheduler,
            tasks,
            releases,
        })
    }

    pub fn tasks(&self) -> Arc<TaskService> {
        self.tasks.clone()
    }

    pub fn releases(&self) -> Arc<ReleaseOrchestrator> {
        self.releases.clone()
    }

    pub fn queue(&self) -> Arc<PriorityQueue> {
        self.queue.clone()
    }

    pub fn pool(&self) -> Arc<WorkerPool> {
        self.pool.clone()
    }

    pub fn scheduler(&self) -> Arc<RecurringScheduler> {
        self.scheduler.clone()
    }

    /// 启动队列、工作池和定时调度器
    pub async fn start(&self) -> Result<()> {
        self.queue.start();
        self.pool.start();

        if self.config.scheduler.enabled {
            self.scheduler.start().await;
            if self.config.scheduler.load_on_start {
                let restored = self
                    .tasks
                    .restore_scheduled_tasks()
                    .await
                    .context("恢复定时任务失败")?;
                info!("已恢复定时任务: {}", restored);
            }
        }
        info!("应用已启动");
        Ok(())
    }

    /// 启动后等待关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.start().await?;
        if let Err(e) = shutdown_rx.recv().await {
            warn!("关闭信号通道异常: {}", e);
        }
        info!("应用收到关闭信号");
        self.shutdown().await;
        Ok(())
    }

    /// 先停止产生新任务的组件，再停止执行端
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.releases.stop().await;
        self.pool.stop().await;
        self.queue.stop();
        self.database.close().await;
        info!("应用已停止");
    }
}
