use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use scheduler_core::models::{Job, JobRecord, JobStatus, NewParentTask, ParentTaskPatch, TaskType};
use scheduler_core::traits::{ExecutionOutcome, TaskRepository};
use scheduler_testing_utils::MockTaskRepository;
use scheduler_worker::{GateDecision, JobLifecycleManager, NextRunResolver};
use std::sync::Arc;
use tempfile::TempDir;

fn job_of(record: &JobRecord) -> Job {
    Job::new(record.id, record.task_id, record.payload.clone())
}

fn manager(repo: &MockTaskRepository, logs: &TempDir) -> JobLifecycleManager {
    JobLifecycleManager::new(Arc::new(repo.clone()), logs.path())
}

#[tokio::test]
async fn test_success_writes_log_file() {
    let repo = MockTaskRepository::new();
    let logs = tempfile::tempdir().unwrap();
    let lifecycle = manager(&repo, &logs);
    let (task, jobs) = repo
        .create_task(&NewParentTask::commands("once", TaskType::Immediate, &[4], &[1]))
        .await
        .unwrap();
    let job = job_of(&jobs[0]);

    assert_eq!(lifecycle.gate(&job).await.unwrap(), GateDecision::Proceed);
    let started = lifecycle.mark_running(&job).await.unwrap().unwrap();
    assert_eq!(repo.job(job.record_id).unwrap().status, JobStatus::Running);

    lifecycle
        .complete(&job, started, &ExecutionOutcome::succeeded(Some("done\n".into())))
        .await
        .unwrap();

    let record = repo.job(job.record_id).unwrap();
    assert_eq!(record.status, JobStatus::Succeeded);
    let expected = lifecycle.log_file_path(task.id, 4);
    assert_eq!(record.log_path.as_deref(), Some(expected.to_str().unwrap()));
    assert_eq!(std::fs::read_to_string(&expected).unwrap(), "done\n");
    assert!(expected.ends_with(format!("task_{0}/task_{0}_template_4.log", task.id)));

    let parent = repo.task(task.id).unwrap();
    assert_eq!(parent.status, JobStatus::Succeeded);
    assert_eq!(parent.execute_count, 1);
}

#[tokio::test]
async fn test_recurring_parent_resets_children_and_schedules_next_run() {
    let repo = MockTaskRepository::new();
    let logs = tempfile::tempdir().unwrap();
    let next = Utc.with_ymd_and_hms(2030, 1, 1, 0, 5, 0).unwrap();
    let resolver: NextRunResolver = Arc::new(move |expr: &str| {
        assert_eq!(expr, "*/5 * * * *");
        Some(next)
    });
    let lifecycle = manager(&repo, &logs).with_next_run_resolver(resolver);
    let (task, jobs) = repo
        .create_task(
            &NewParentTask::commands("cron", TaskType::Scheduled, &[1], &[1, 2])
                .with_cron("*/5 * * * *"),
        )
        .await
        .unwrap();

    for record in &jobs {
        let job = job_of(record);
        let started = lifecycle.mark_running(&job).await.unwrap().unwrap();
        lifecycle
            .complete(&job, started, &ExecutionOutcome::succeeded(None))
            .await
            .unwrap();
    }

    let parent = repo.task(task.id).unwrap();
    assert_eq!(parent.status, JobStatus::Running);
    assert_eq!(parent.next_run_time, Some(next));
    assert_eq!(parent.execute_count, 1);
    assert!(repo
        .jobs_of(task.id)
        .iter()
        .all(|j| j.status == JobStatus::Pending));
}

#[tokio::test]
async fn test_paused_recurring_parent_stays_paused() {
    let repo = MockTaskRepository::new();
    let logs = tempfile::tempdir().unwrap();
    let lifecycle = manager(&repo, &logs);
    let (task, jobs) = repo
        .create_task(
            &NewParentTask::commands("cron", TaskType::Scheduled, &[1], &[1])
                .with_cron("0 * * * *"),
        )
        .await
        .unwrap();
    let job = job_of(&jobs[0]);
    let started = lifecycle.mark_running(&job).await.unwrap().unwrap();
    repo.update_task(task.id, &ParentTaskPatch::status(JobStatus::Paused))
        .await
        .unwrap();

    lifecycle
        .complete(&job, started, &ExecutionOutcome::succeeded(None))
        .await
        .unwrap();

    assert_eq!(repo.task(task.id).unwrap().status, JobStatus::Paused);
    assert_eq!(repo.job(job.record_id).unwrap().status, JobStatus::Pending);
    assert_eq!(lifecycle.gate(&job).await.unwrap(), GateDecision::ParentPaused);
}

#[tokio::test]
async fn test_failed_parent_is_not_resurrected() {
    let repo = MockTaskRepository::new();
    let logs = tempfile::tempdir().unwrap();
    let lifecycle = manager(&repo, &logs);
    let (task, jobs) = repo
        .create_task(&NewParentTask::commands("batch", TaskType::Batch, &[1], &[1]))
        .await
        .unwrap();
    let job = job_of(&jobs[0]);
    let started = lifecycle.mark_running(&job).await.unwrap().unwrap();
    repo.update_task(task.id, &ParentTaskPatch::status(JobStatus::Failed))
        .await
        .unwrap();

    lifecycle
        .complete(&job, started, &ExecutionOutcome::succeeded(None))
        .await
        .unwrap();

    assert_eq!(repo.task(task.id).unwrap().status, JobStatus::Failed);
    assert_eq!(repo.job(job.record_id).unwrap().status, JobStatus::Succeeded);
}

#[tokio::test]
async fn test_late_result_does_not_overwrite_manual_stop() {
    let repo = MockTaskRepository::new();
    let logs = tempfile::tempdir().unwrap();
    let lifecycle = manager(&repo, &logs);
    let (_, jobs) = repo
        .create_task(&NewParentTask::commands("stop", TaskType::Immediate, &[1], &[1]))
        .await
        .unwrap();
    let job = job_of(&jobs[0]);
    let started = lifecycle.mark_running(&job).await.unwrap().unwrap();

    lifecycle.fail(&job, Some(started), "任务被手动停止").await.unwrap();
    lifecycle
        .complete(&job, started, &ExecutionOutcome::succeeded(Some("late".into())))
        .await
        .unwrap();

    let record = repo.job(job.record_id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("任务被手动停止"));
    assert!(record.log.is_none());
    assert_eq!(lifecycle.gate(&job).await.unwrap(), GateDecision::AlreadyResolved);
}

#[tokio::test]
async fn test_stopped_record_cannot_be_claimed_again() {
    let repo = MockTaskRepository::new();
    let logs = tempfile::tempdir().unwrap();
    let lifecycle = manager(&repo, &logs);
    let (_, jobs) = repo
        .create_task(&NewParentTask::commands("stop", TaskType::Batch, &[1], &[1, 2]))
        .await
        .unwrap();
    let job = job_of(&jobs[1]);

    lifecycle.fail(&job, None, "父任务已停止，取消执行").await.unwrap();
    assert!(lifecycle.mark_running(&job).await.unwrap().is_none());

    let record = repo.job(job.record_id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.start_time.is_none());
}

#[tokio::test]
async fn test_parent_waits_for_every_child() {
    let repo = MockTaskRepository::new();
    let logs = tempfile::tempdir().unwrap();
    let lifecycle = manager(&repo, &logs);
    let (task, jobs) = repo
        .create_task(&NewParentTask::commands("pair", TaskType::Batch, &[1], &[1, 2]))
        .await
        .unwrap();

    let first = job_of(&jobs[0]);
    let started = Utc::now() - ChronoDuration::seconds(4);
    lifecycle
        .complete(&first, started, &ExecutionOutcome::failed("命令执行失败，退出码: 2"))
        .await
        .unwrap();
    assert_eq!(lifecycle.refresh_parent(task.id).await.unwrap(), None);
    assert_eq!(repo.task(task.id).unwrap().execute_count, 0);

    let second = job_of(&jobs[1]);
    lifecycle.reset_pending(&second, Some("网络抖动")).await.unwrap();
    assert_eq!(
        repo.job(second.record_id).unwrap().error_message.as_deref(),
        Some("网络抖动")
    );
    lifecycle
        .complete(&second, Utc::now(), &ExecutionOutcome::succeeded(None))
        .await
        .unwrap();

    let parent = repo.task(task.id).unwrap();
    assert_eq!(parent.status, JobStatus::Failed);
    assert!(parent.duration_secs >= 4);
}

#[tokio::test]
async fn test_gate_reports_missing_records() {
    let repo = MockTaskRepository::new();
    let logs = tempfile::tempdir().unwrap();
    let lifecycle = manager(&repo, &logs);
    let job = Job::new(
        404,
        404,
        scheduler_core::models::JobPayload::Command {
            host_id: 1,
            template_id: 1,
        },
    );
    assert_eq!(lifecycle.gate(&job).await.unwrap(), GateDecision::Missing);
}
