use devops_scheduler::app::Application;
use scheduler_config::{AppConfig, BuildServerEntry, HostEntry, TemplateEntry};
use scheduler_core::models::{ExecutionMode, JobStatus, NewParentTask, TaskType};
use scheduler_core::SchedulerError;
use scheduler_testing_utils::ReleaseBuilder;
use std::time::Duration;
use tempfile::TempDir;

fn config_in(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("scheduler.db").display()
    );
    config.ssh.log_dir = dir.path().join("logs").display().to_string();
    config.worker_pool.workers = 1;
    config.worker_pool.poll_timeout_ms = 200;
    config.targets.hosts.push(HostEntry {
        id: 1,
        address: "10.0.0.1".to_string(),
        port: 22,
        username: "deploy".to_string(),
        password: None,
        private_key: None,
    });
    config.targets.templates.push(TemplateEntry {
        id: 7,
        name: "uptime".to_string(),
        content: "uptime".to_string(),
    });
    config.targets.build_servers.push(BuildServerEntry {
        id: 1,
        base_url: "http://127.0.0.1:9".to_string(),
        username: "ci".to_string(),
        token: "token".to_string(),
    });
    config
}

#[tokio::test]
async fn test_scheduled_tasks_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);

    let app = Application::new(config.clone()).await.unwrap();
    app.start().await.unwrap();
    let (task, _) = app
        .tasks()
        .create_task(
            &NewParentTask::commands("nightly", TaskType::Scheduled, &[7], &[1])
                .with_cron("0 3 * * *"),
        )
        .await
        .unwrap();
    app.tasks().start_task(task.id).await.unwrap();
    assert!(app.scheduler().contains(task.id).await);
    app.shutdown().await;

    let restarted = Application::new(config).await.unwrap();
    restarted.start().await.unwrap();
    assert!(restarted.scheduler().is_running());
    assert!(restarted.scheduler().contains(task.id).await);

    let progress = restarted.tasks().task_progress(task.id).await.unwrap();
    assert_eq!(progress.status, JobStatus::Running);
    assert_eq!(progress.total, 1);
    assert!(progress.next_run_time.unwrap() > chrono::Utc::now());

    tokio::time::timeout(Duration::from_secs(30), restarted.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_paused_task_is_not_restored() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);

    let app = Application::new(config.clone()).await.unwrap();
    app.start().await.unwrap();
    let (task, _) = app
        .tasks()
        .create_task(
            &NewParentTask::commands("weekly", TaskType::Scheduled, &[7], &[1])
                .with_cron("0 0 * * 1"),
        )
        .await
        .unwrap();
    app.tasks().start_task(task.id).await.unwrap();
    app.tasks().pause_task(task.id).await.unwrap();
    app.shutdown().await;

    let restarted = Application::new(config).await.unwrap();
    restarted.start().await.unwrap();
    assert!(!restarted.scheduler().contains(task.id).await);

    let next = restarted.tasks().resume_task(task.id).await.unwrap();
    assert!(next > chrono::Utc::now());
    assert!(restarted.scheduler().contains(task.id).await);
    restarted.shutdown().await;
}

#[tokio::test]
async fn test_targets_come_from_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let app = Application::new(config_in(&dir)).await.unwrap();

    let err = app
        .tasks()
        .create_task(&NewParentTask::commands("deploy", TaskType::Immediate, &[7], &[2]))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::HostNotFound { id: 2 }));

    let err = app
        .tasks()
        .create_task(&NewParentTask::commands("deploy", TaskType::Immediate, &[8], &[1]))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::TemplateNotFound { id: 8 }));
    app.shutdown().await;
}

#[tokio::test]
async fn test_release_lifecycle_through_application() {
    let dir = tempfile::tempdir().unwrap();
    let app = Application::new(config_in(&dir)).await.unwrap();
    let releases = app.releases();

    let err = releases
        .create_release(&ReleaseBuilder::new("hotfix").with_app("web", "prod", 1).build())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("生产环境禁止快速发布"));

    let (release, tasks) = releases
        .create_release(
            &ReleaseBuilder::new("sprint")
                .with_app("web", "test", 1)
                .with_app("api", "test", 1)
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].execute_order, 1);
    assert_eq!(tasks[1].execute_order, 2);

    let view = releases.release_task_status(tasks[0].id).await.unwrap();
    assert_eq!(view.progress, 0);
    assert!(releases.release_task_log(tasks[0].id, 0).await.is_err());

    releases.delete_release(release.id).await.unwrap();
    let err = releases
        .execute_release(release.id, ExecutionMode::Parallel)
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ReleaseNotFound { .. }));
    app.shutdown().await;
}

#[tokio::test]
async fn test_disabled_scheduler_stays_idle() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(&dir);
    config.scheduler.enabled = false;
    config.scheduler.load_on_start = false;

    let app = Application::new(config).await.unwrap();
    app.start().await.unwrap();
    assert!(!app.scheduler().is_running());
    assert!(app.pool().is_running());
    assert!(app.queue().is_running());

    app.shutdown().await;
    assert!(!app.pool().is_running());
    assert!(!app.queue().is_running());
}
