use chrono::Utc;
use scheduler_core::models::JobStatus;
use scheduler_core::SchedulerError;
use scheduler_dispatcher::{RecurringScheduler, TriggerCallback};
use scheduler_testing_utils::{MockTaskRepository, ParentTaskBuilder, TestEnv};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const EVERY_SECOND: &str = "* * * * * *";

fn counting() -> (TriggerCallback, Arc<AtomicUsize>) {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let callback: TriggerCallback = Arc::new(move |_| {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    });
    (callback, fired)
}

#[tokio::test]
async fn test_registered_task_fires_while_running() {
    let scheduler = RecurringScheduler::new(Arc::new(MockTaskRepository::new()));
    let (callback, fired) = counting();
    scheduler
        .add_scheduled_task(1, EVERY_SECOND, callback)
        .await
        .unwrap();
    // 未启动时不触发
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    scheduler.start().await;
    let observed = fired.clone();
    assert!(
        TestEnv::wait_for(
            || {
                let observed = observed.clone();
                async move { observed.load(Ordering::SeqCst) >= 1 }
            },
            Duration::from_secs(3),
        )
        .await
    );

    scheduler.stop().await;
    let after_stop = fired.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(fired.load(Ordering::SeqCst), after_stop);
    assert!(!scheduler.stats().await.running);
    assert_eq!(scheduler.stats().await.entry_count, 1);
}

#[tokio::test]
async fn test_callback_can_remove_its_own_registration() {
    let scheduler = Arc::new(RecurringScheduler::new(Arc::new(MockTaskRepository::new())));
    let fired = Arc::new(AtomicUsize::new(0));
    let callback: TriggerCallback = {
        let scheduler = Arc::downgrade(&scheduler);
        let fired = fired.clone();
        Arc::new(move |task_id| {
            let scheduler = scheduler.clone();
            let fired = fired.clone();
            Box::pin(async move {
                fired.fetch_add(1, Ordering::SeqCst);
                if let Some(scheduler) = scheduler.upgrade() {
                    scheduler.remove_scheduled_task(task_id).await;
                }
            })
        })
    };
    scheduler.start().await;
    scheduler
        .add_scheduled_task(9, EVERY_SECOND, callback)
        .await
        .unwrap();

    let observed = fired.clone();
    assert!(
        TestEnv::wait_for(
            || {
                let observed = observed.clone();
                async move { observed.load(Ordering::SeqCst) == 1 }
            },
            Duration::from_secs(3),
        )
        .await
    );
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!scheduler.contains(9).await);
    tokio::time::timeout(Duration::from_secs(2), scheduler.stop())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_pause_then_resume_schedules_future_run() {
    let repo = MockTaskRepository::new();
    repo.insert_task(
        ParentTaskBuilder::new()
            .with_id(3)
            .scheduled("*/5 * * * *")
            .with_status(JobStatus::Running)
            .build(),
    );
    let scheduler = RecurringScheduler::new(Arc::new(repo.clone()));
    let (callback, _) = counting();
    scheduler
        .add_scheduled_task(3, "*/5 * * * *", callback.clone())
        .await
        .unwrap();

    scheduler.pause_scheduled_task(3).await.unwrap();
    assert_eq!(repo.task(3).unwrap().status, JobStatus::Paused);
    assert!(!scheduler.contains(3).await);

    let before = Utc::now();
    let next = scheduler.resume_scheduled_task(3, callback).await.unwrap();
    assert!(next > before);

    let task = repo.task(3).unwrap();
    assert_eq!(task.status, JobStatus::Running);
    assert_eq!(task.next_run_time, Some(next));
    assert!(scheduler.contains(3).await);
}

#[tokio::test]
async fn test_resume_requires_paused_recurring_task() {
    let repo = MockTaskRepository::new();
    repo.insert_task(
        ParentTaskBuilder::new()
            .with_id(1)
            .scheduled("0 * * * *")
            .with_status(JobStatus::Running)
            .build(),
    );
    repo.insert_task(
        ParentTaskBuilder::new()
            .with_id(2)
            .with_status(JobStatus::Paused)
            .build(),
    );
    let scheduler = RecurringScheduler::new(Arc::new(repo));
    let (callback, _) = counting();

    let err = scheduler
        .resume_scheduled_task(1, callback.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidState(_)));

    let err = scheduler
        .resume_scheduled_task(2, callback.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidState(_)));

    let err = scheduler.resume_scheduled_task(404, callback).await.unwrap_err();
    assert!(matches!(err, SchedulerError::TaskNotFound { id: 404 }));
}

#[tokio::test]
async fn test_load_restores_running_and_pending_tasks() {
    let repo = MockTaskRepository::new();
    let stale = Utc::now() - chrono::Duration::hours(3);
    repo.insert_task(
        ParentTaskBuilder::new()
            .with_id(1)
            .scheduled("0 * * * *")
            .with_status(JobStatus::Running)
            .with_next_run_time(stale)
            .build(),
    );
    repo.insert_task(
        ParentTaskBuilder::new()
            .with_id(2)
            .scheduled("*/10 * * * *")
            .with_status(JobStatus::Pending)
            .build(),
    );
    repo.insert_task(
        ParentTaskBuilder::new()
            .with_id(3)
            .scheduled("0 * * * *")
            .with_status(JobStatus::Paused)
            .build(),
    );
    repo.insert_task(
        ParentTaskBuilder::new()
            .with_id(4)
            .scheduled("0 * * * *")
            .with_status(JobStatus::Failed)
            .build(),
    );
    repo.insert_task(
        ParentTaskBuilder::new()
            .with_id(5)
            .scheduled("  ")
            .with_status(JobStatus::Running)
            .build(),
    );

    let scheduler = RecurringScheduler::new(Arc::new(repo.clone()));
    let (callback, _) = counting();
    let registered = scheduler.load_scheduled_tasks(callback).await.unwrap();

    assert_eq!(registered, 2);
    let ids: Vec<i64> = scheduler.entries().await.iter().map(|e| e.task_id).collect();
    assert_eq!(ids, vec![1, 2]);

    let now = Utc::now();
    let running = repo.task(1).unwrap();
    assert!(running.next_run_time.unwrap() > now);
    let pending = repo.task(2).unwrap();
    assert_eq!(pending.status, JobStatus::Running);
    assert!(pending.next_run_time.unwrap() > now);
    assert_eq!(repo.task(3).unwrap().status, JobStatus::Paused);
    assert_eq!(repo.task(4).unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_update_replaces_expression() {
    let scheduler = RecurringScheduler::new(Arc::new(MockTaskRepository::new()));
    let (callback, _) = counting();
    scheduler
        .add_scheduled_task(1, "0 * * * *", callback.clone())
        .await
        .unwrap();

    assert!(scheduler
        .update_scheduled_task(1, "not a cron", callback.clone())
        .await
        .is_err());
    assert_eq!(scheduler.entries().await[0].cron_expr, "0 * * * *");

    scheduler
        .update_scheduled_task(1, "30 2 * * *", callback)
        .await
        .unwrap();
    assert_eq!(scheduler.entries().await[0].cron_expr, "30 2 * * *");
    assert!(scheduler.remove_scheduled_task(1).await);
    assert!(!scheduler.remove_scheduled_task(1).await);
}
