mod common;

use common::harness;
use scheduler_core::models::{
    JobRecordPatch, JobStatus, NewParentTask, ParentTaskPatch, Priority, TaskType,
};
use scheduler_core::traits::{ExecutionOutcome, TaskRepository};
use scheduler_testing_utils::{
    FastConfig, HostBuilder, MockAdapter, MockRemoteShell, MockStep, MockTargetResolver, TestEnv,
};
use scheduler_worker::SshAdapter;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_high_priority_jobs_run_first() {
    let adapter = Arc::new(MockAdapter::new());
    let h = harness(FastConfig::worker_pool(1), adapter.clone());

    let (_, high_a) = h
        .create(&NewParentTask::commands("a", TaskType::Immediate, &[1], &[1]))
        .await;
    let (_, low) = h
        .create(&NewParentTask::commands("b", TaskType::Batch, &[1], &[2]))
        .await;
    let (_, high_b) = h
        .create(&NewParentTask::commands("c", TaskType::Immediate, &[1], &[3]))
        .await;

    h.enqueue(&high_a[0], Priority::High).await;
    h.enqueue(&low[0], Priority::Low).await;
    h.enqueue(&high_b[0], Priority::High).await;

    h.pool.start();
    let ids = [high_a[0].id, low[0].id, high_b[0].id];
    assert!(h.wait_terminal(&ids, Duration::from_secs(5)).await);
    h.pool.stop().await;

    assert_eq!(adapter.executed(), vec![high_a[0].id, high_b[0].id, low[0].id]);
}

#[tokio::test]
async fn test_admission_respects_global_and_target_ceilings() {
    let adapter = Arc::new(MockAdapter::new().with_delay(Duration::from_millis(40)));
    let mut config = FastConfig::worker_pool(16);
    config.max_concurrency = 4;
    config.per_target_concurrency = 2;
    let h = harness(config, adapter.clone());

    let (_, jobs) = h
        .create(&NewParentTask::commands(
            "burst",
            TaskType::Batch,
            &[1, 2, 3, 4],
            &[1, 2, 3],
        ))
        .await;
    h.pool.start();
    for job in &jobs {
        h.enqueue(job, Priority::Low).await;
    }

    let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
    assert!(h.wait_terminal(&ids, Duration::from_secs(10)).await);
    h.pool.stop().await;

    assert_eq!(adapter.invocations(), 12);
    assert!(adapter.high_water() <= 4, "global high water {}", adapter.high_water());
    for host in ["host:1", "host:2", "host:3"] {
        assert!(adapter.target_high_water(host) <= 2, "{host} exceeded");
    }
}

#[tokio::test]
async fn test_exhausted_retries_land_in_failed_lane_once() {
    let adapter = Arc::new(
        MockAdapter::new().with_steps((0..10).map(|_| MockStep::Error("dispatch broke".into()))),
    );
    let h = harness(FastConfig::worker_pool(2), adapter.clone());
    let (task, jobs) = h
        .create(&NewParentTask::commands("retry", TaskType::Immediate, &[1], &[1]))
        .await;
    h.pool.start();
    h.enqueue(&jobs[0], Priority::High).await;

    assert!(h.wait_terminal(&[jobs[0].id], Duration::from_secs(15)).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.pool.stop().await;

    assert_eq!(adapter.invocations(), 3);
    let lanes = h.queue.lane_lengths().await.unwrap();
    assert_eq!(lanes.failed, 1);
    assert_eq!(lanes.active(), 0);
    assert_eq!(lanes.retry, 0);

    let failed = h.queue.failed_jobs().await.unwrap();
    assert_eq!(failed[0].job.record_id, jobs[0].id);
    assert_eq!(failed[0].retry_count, 3);

    let record = h.repo.job(jobs[0].id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record
        .error_message
        .unwrap()
        .contains("重试3次后仍然失败"));
    assert_eq!(h.repo.task(task.id).unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_content_failure_is_not_retried() {
    let adapter = Arc::new(MockAdapter::new().with_steps([MockStep::Outcome(
        ExecutionOutcome::failed("命令执行失败，退出码: 1").with_log("partial output"),
    )]));
    let h = harness(FastConfig::worker_pool(1), adapter.clone());
    let (task, jobs) = h
        .create(&NewParentTask::commands("content", TaskType::Immediate, &[1], &[1]))
        .await;
    h.pool.start();
    h.enqueue(&jobs[0], Priority::High).await;

    assert!(h.wait_terminal(&[jobs[0].id], Duration::from_secs(5)).await);
    h.pool.stop().await;

    assert_eq!(adapter.invocations(), 1);
    let record = h.repo.job(jobs[0].id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.log.as_deref(), Some("partial output"));
    assert_eq!(h.queue.lane_lengths().await.unwrap().failed, 0);
    assert_eq!(h.repo.task(task.id).unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_ssh_authentication_failure_consumes_four_attempts() {
    let shell = Arc::new(MockRemoteShell::unreachable(
        "Permission denied (publickey,password). 认证失败",
    ));
    let resolver = Arc::new(
        MockTargetResolver::new()
            .with_host(HostBuilder::new(1).with_password("secret").build())
            .with_template(1, "uptime"),
    );
    let adapter = Arc::new(SshAdapter::new(shell.clone(), resolver, FastConfig::ssh()));
    let h = harness(FastConfig::worker_pool(1), adapter);

    let (task, jobs) = h
        .create(&NewParentTask::commands("auth", TaskType::Immediate, &[1], &[1]))
        .await;
    h.pool.start();
    h.enqueue(&jobs[0], Priority::High).await;

    assert!(h.wait_terminal(&[jobs[0].id], Duration::from_secs(5)).await);
    h.pool.stop().await;

    assert_eq!(shell.call_count(), 4);
    let record = h.repo.job(jobs[0].id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error_message.unwrap().contains("认证"));
    assert_eq!(h.queue.lane_lengths().await.unwrap().failed, 1);
    assert_eq!(h.repo.task(task.id).unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_failed_parent_blocks_execution() {
    let adapter = Arc::new(MockAdapter::new());
    let h = harness(FastConfig::worker_pool(1), adapter.clone());
    let (task, jobs) = h
        .create(&NewParentTask::commands("stopped", TaskType::Immediate, &[1], &[1]))
        .await;
    h.repo
        .update_task(task.id, &ParentTaskPatch::status(JobStatus::Failed))
        .await
        .unwrap();

    h.pool.start();
    h.enqueue(&jobs[0], Priority::High).await;
    assert!(h.wait_terminal(&[jobs[0].id], Duration::from_secs(5)).await);
    h.pool.stop().await;

    assert_eq!(adapter.invocations(), 0);
    let record = h.repo.job(jobs[0].id).unwrap();
    assert_eq!(record.error_message.as_deref(), Some("父任务已失败，取消执行"));
}

#[tokio::test]
async fn test_stop_during_admission_wait_prevents_execution() {
    let adapter = Arc::new(MockAdapter::new().with_delay(Duration::from_millis(400)));
    let mut config = FastConfig::worker_pool(2);
    config.per_target_concurrency = 1;
    let h = harness(config, adapter.clone());
    let (task, jobs) = h
        .create(&NewParentTask::commands("same-host", TaskType::Batch, &[1, 2], &[1]))
        .await;
    h.pool.start();
    for job in &jobs {
        h.enqueue(job, Priority::Low).await;
    }

    let observed = adapter.clone();
    assert!(
        TestEnv::wait_for(
            || {
                let observed = observed.clone();
                async move { observed.invocations() == 1 }
            },
            Duration::from_secs(2),
        )
        .await
    );

    // 第二个任务还在等同一主机的令牌时整体停止
    let stopped = JobRecordPatch {
        status: Some(JobStatus::Failed),
        error_message: Some("父任务已停止，取消执行".to_string()),
        ..Default::default()
    };
    for job in &jobs {
        h.repo.update_job(job.id, &stopped).await.unwrap();
    }
    h.repo
        .update_task(task.id, &ParentTaskPatch::status(JobStatus::Failed))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;
    h.pool.stop().await;

    assert_eq!(adapter.invocations(), 1);
    for job in &jobs {
        assert_eq!(h.repo.job(job.id).unwrap().status, JobStatus::Failed);
    }
    assert_eq!(h.repo.task(task.id).unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_paused_parent_skips_job() {
    let adapter = Arc::new(MockAdapter::new());
    let h = harness(FastConfig::worker_pool(1), adapter.clone());
    let (task, jobs) = h
        .create(
            &NewParentTask::commands("paused", TaskType::Scheduled, &[1], &[1])
                .with_cron("*/5 * * * *"),
        )
        .await;
    h.repo
        .update_task(task.id, &ParentTaskPatch::status(JobStatus::Paused))
        .await
        .unwrap();

    h.pool.start();
    h.enqueue(&jobs[0], Priority::Normal).await;
    let queue = h.queue.clone();
    assert!(
        TestEnv::wait_for(
            || {
                let queue = queue.clone();
                async move { queue.queue_length().await.unwrap() == 0 }
            },
            Duration::from_secs(5),
        )
        .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.pool.stop().await;

    assert_eq!(adapter.invocations(), 0);
    assert_eq!(h.repo.job(jobs[0].id).unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn test_parent_aggregates_after_all_children() {
    let adapter = Arc::new(MockAdapter::new());
    let h = harness(FastConfig::worker_pool(2), adapter.clone());
    let (task, jobs) = h
        .create(&NewParentTask::commands("batch", TaskType::Batch, &[1], &[1, 2]))
        .await;
    h.pool.start();
    for job in &jobs {
        h.enqueue(job, Priority::Low).await;
    }
    let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
    assert!(h.wait_terminal(&ids, Duration::from_secs(5)).await);

    let repo = h.repo.clone();
    let task_id = task.id;
    assert!(
        TestEnv::wait_for(
            || {
                let repo = repo.clone();
                async move { repo.task(task_id).map(|t| t.execute_count) == Some(1) }
            },
            Duration::from_secs(5),
        )
        .await
    );
    h.pool.stop().await;

    let parent = h.repo.task(task.id).unwrap();
    assert_eq!(parent.status, JobStatus::Succeeded);
    assert!(parent.end_time.is_some());
    for id in ids {
        let record = h.repo.job(id).unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
        assert!(record.log_path.unwrap().ends_with("task_1_template_1.log"));
    }

    let metrics = h.pool.metrics().await;
    assert_eq!(metrics.processed_total, 2);
    assert_eq!(metrics.failed_total, 0);
    assert_eq!(metrics.enqueued_total, 2);
    assert!(metrics.last_process_time.is_some());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = harness(FastConfig::worker_pool(3), Arc::new(MockAdapter::new()));
    h.pool.start();
    assert!(h.pool.is_running());
    tokio::time::timeout(Duration::from_secs(2), h.pool.stop())
        .await
        .unwrap();
    assert!(!h.pool.is_running());
    h.pool.stop().await;
}
