use anyhow::Result;
use scheduler_core::models::{Job, JobPayload, Priority};
use scheduler_core::traits::JobStore;
use scheduler_infrastructure::{PriorityQueue, RedisJobStore};
use scheduler_testing_utils::RedisTestContainer;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
#[ignore = "需要Docker环境"]
async fn test_redis_store_priority_queue() -> Result<()> {
    let redis = RedisTestContainer::new().await?;
    let store = Arc::new(RedisJobStore::connect(&redis.url, Duration::from_secs(5)).await?);
    store.set("health", "ok".to_string()).await?;
    assert_eq!(store.get("health").await?.as_deref(), Some("ok"));

    let queue = PriorityQueue::new(store.clone(), "it", 3);
    queue.start();
    let payload = JobPayload::Build {
        server_id: 1,
        job_name: "deploy".to_string(),
    };
    queue
        .enqueue(Job::new(1, 1, payload.clone()), Priority::Low, None)
        .await?;
    queue
        .enqueue(Job::new(2, 1, payload), Priority::High, None)
        .await?;

    let first = queue.dequeue(Duration::from_secs(1)).await?.expect("job");
    assert_eq!(first.job.record_id, 2);
    let second = queue.dequeue(Duration::from_secs(1)).await?.expect("job");
    assert_eq!(second.job.record_id, 1);
    assert!(queue.dequeue(Duration::from_secs(1)).await?.is_none());
    Ok(())
}

#[tokio::test]
#[ignore = "需要Docker环境"]
async fn test_blocked_pops_do_not_stall_other_commands() -> Result<()> {
    let redis = RedisTestContainer::new().await?;
    let store = Arc::new(RedisJobStore::connect(&redis.url, Duration::from_secs(5)).await?);
    let lists = vec!["it:idle".to_string()];

    let mut waiters = Vec::new();
    for _ in 0..2 {
        let store = store.clone();
        let lists = lists.clone();
        waiters.push(tokio::spawn(async move {
            store.pop(&lists, Duration::from_secs(3)).await
        }));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    store.push("it:other", "x".to_string()).await?;
    store.set("health", "ok".to_string()).await?;
    assert!(started.elapsed() < Duration::from_secs(1));

    store.push("it:idle", "a".to_string()).await?;
    store.push("it:idle", "b".to_string()).await?;
    let mut popped = Vec::new();
    for waiter in waiters {
        if let Some((_, value)) = waiter.await?? {
            popped.push(value);
        }
    }
    popped.sort();
    assert_eq!(popped, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(store.idle_blocking_connections().await, 2);
    Ok(())
}
