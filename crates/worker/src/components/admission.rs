use scheduler_core::{CancelSignal, SchedulerError, SchedulerResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::debug;

/// 准入许可，离开作用域时同时归还全局和目标许可
#[derive(Debug)]
pub struct AdmissionPermit {
    _target: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

/// 全局与单目标两级并发控制
///
/// 目标信号量按需创建，获取许可没有固定超时，只受关闭信号约束。
pub struct AdmissionController {
    global: Arc<Semaphore>,
    per_target: RwLock<HashMap<String, Arc<Semaphore>>>,
    per_target_capacity: usize,
}

impl AdmissionController {
    pub fn new(global_capacity: usize, per_target_capacity: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_capacity)),
            per_target: RwLock::new(HashMap::new()),
            per_target_capacity,
        }
    }

    async fn target_semaphore(&self, target_key: &str) -> Arc<Semaphore> {
        if let Some(sem) = self.per_target.read().await.get(target_key) {
            return sem.clone();
        }
        let mut guard = self.per_target.write().await;
        guard
            .entry(target_key.to_string())
            .or_insert_with(|| {
                debug!("创建目标并发信号量: target={}", target_key);
                Arc::new(Semaphore::new(self.per_target_capacity))
            })
            .clone()
    }

    /// 先取全局许可，再取目标许可
    pub async fn acquire(
        &self,
        target_key: &str,
        shutdown: &mut CancelSignal,
    ) -> SchedulerResult<AdmissionPermit> {
        let global = tokio::select! {
            permit = self.global.clone().acquire_owned() => permit
                .map_err(|_| SchedulerError::AdmissionDenied("全局并发信号量已关闭".to_string()))?,
            _ = shutdown.cancelled() => return Err(SchedulerError::Shutdown),
        };

        let semaphore = self.target_semaphore(target_key).await;
        let target = tokio::select! {
            permit = semaphore.acquire_owned() => permit
                .map_err(|_| SchedulerError::AdmissionDenied(format!("目标并发信号量已关闭: {target_key}")))?,
            _ = shutdown.cancelled() => return Err(SchedulerError::Shutdown),
        };

        Ok(AdmissionPermit {
            _target: target,
            _global: global,
        })
    }

    pub fn available_global(&self) -> usize {
        self.global.available_permits()
    }

    pub async fn available_for(&self, target_key: &str) -> usize {
        match self.per_target.read().await.get(target_key) {
            Some(sem) => sem.available_permits(),
            None => self.per_target_capacity,
        }
    }

    pub async fn target_count(&self) -> usize {
        self.per_target.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::CancelHandle;
    use std::time::Duration;

    #[tokio::test]
    async fn test_permits_released_on_drop() {
        let controller = AdmissionController::new(2, 1);
        let mut signal = CancelSignal::never();

        let permit = controller.acquire("host:1", &mut signal).await.unwrap();
        assert_eq!(controller.available_global(), 1);
        assert_eq!(controller.available_for("host:1").await, 0);
        assert_eq!(controller.available_for("host:2").await, 1);

        drop(permit);
        assert_eq!(controller.available_global(), 2);
        assert_eq!(controller.available_for("host:1").await, 1);
    }

    #[tokio::test]
    async fn test_target_limit_blocks_until_release() {
        let controller = Arc::new(AdmissionController::new(10, 1));
        let mut signal = CancelSignal::never();
        let first = controller.acquire("host:1", &mut signal).await.unwrap();

        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move {
                let mut signal = CancelSignal::never();
                controller.acquire("host:1", &mut signal).await.map(|_| ())
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_wait() {
        let controller = Arc::new(AdmissionController::new(1, 1));
        let mut never = CancelSignal::never();
        let _held = controller.acquire("host:1", &mut never).await.unwrap();

        let handle = CancelHandle::new();
        let mut signal = handle.signal();
        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.acquire("host:2", &mut signal).await })
        };
        handle.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(SchedulerError::Shutdown)));
        assert_eq!(controller.target_count().await, 1);
    }
}
