use async_trait::async_trait;
use scheduler_core::{traits::JobStore, SchedulerResult};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;
use tracing::debug;

/// 内存任务存储
///
/// 单进程部署和测试使用。列表语义与Redis一致：推入头部、从尾部弹出；
/// 阻塞弹出通过 `Notify` 等待新数据，直到超时。
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    values: RwLock<HashMap<String, String>>,
    notify: Notify,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn pop_first(&self, lists: &[String]) -> Option<(String, String)> {
        let mut guard = self.lists.lock().await;
        for name in lists {
            if let Some(item) = guard.get_mut(name).and_then(|list| list.pop_back()) {
                return Some((name.clone(), item));
            }
        }
        None
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn push(&self, list: &str, payload: String) -> SchedulerResult<()> {
        {
            let mut guard = self.lists.lock().await;
            guard.entry(list.to_string()).or_default().push_front(payload);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop(
        &self,
        lists: &[String],
        timeout: Duration,
    ) -> SchedulerResult<Option<(String, String)>> {
        let deadline = Instant::now() + timeout;
        loop {
            // 先注册等待，再检查列表，避免错过检查与等待之间的推入
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(hit) = self.pop_first(lists).await {
                return Ok(Some(hit));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("内存队列弹出超时: lists={:?}", lists);
                return Ok(None);
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    async fn try_pop(&self, list: &str) -> SchedulerResult<Option<String>> {
        let mut guard = self.lists.lock().await;
        Ok(guard.get_mut(list).and_then(|l| l.pop_back()))
    }

    async fn len(&self, list: &str) -> SchedulerResult<u64> {
        let guard = self.lists.lock().await;
        Ok(guard.get(list).map(|l| l.len() as u64).unwrap_or(0))
    }

    async fn range(&self, list: &str) -> SchedulerResult<Vec<String>> {
        let guard = self.lists.lock().await;
        Ok(guard
            .get(list)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, key: &str) -> SchedulerResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> SchedulerResult<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}
