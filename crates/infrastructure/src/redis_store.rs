use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use scheduler_core::{traits::JobStore, SchedulerError, SchedulerResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Redis任务存储：LPUSH/BRPOP 列表加 GET/SET
///
/// 普通命令共用 `ConnectionManager`；BRPOP 会阻塞所在连接，
/// 每次弹出借用一条独占连接，用完放回空闲列表。
#[derive(Clone)]
pub struct RedisJobStore {
    client: redis::Client,
    conn: ConnectionManager,
    blocking: Arc<Mutex<Vec<MultiplexedConnection>>>,
}

fn store_error(err: redis::RedisError) -> SchedulerError {
    SchedulerError::JobStore(err.to_string())
}

impl RedisJobStore {
    pub async fn connect(url: &str, timeout: Duration) -> SchedulerResult<Self> {
        info!("连接Redis任务存储: {}", redact_url(url));
        let client = redis::Client::open(url).map_err(store_error)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| SchedulerError::JobStore(format!("连接Redis超时: {timeout:?}")))?
            .map_err(store_error)?;
        Ok(Self {
            client,
            conn,
            blocking: Arc::new(Mutex::new(Vec::new())),
        })
    }

    async fn checkout_blocking(&self) -> SchedulerResult<MultiplexedConnection> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }
        debug!("新建Redis阻塞弹出连接");
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_error)
    }

    async fn checkin_blocking(&self, conn: MultiplexedConnection) {
        self.blocking.lock().await.push(conn);
    }

    /// 当前空闲的阻塞连接数
    pub async fn idle_blocking_connections(&self) -> usize {
        self.blocking.lock().await.len()
    }
}

/// 隐藏URL中的密码
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn push(&self, list: &str, payload: String) -> SchedulerResult<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(list, payload)
            .await
            .map_err(store_error)
    }

    async fn pop(
        &self,
        lists: &[String],
        timeout: Duration,
    ) -> SchedulerResult<Option<(String, String)>> {
        let mut conn = self.checkout_blocking().await?;
        // BRPOP 超时为0表示永久阻塞，至少等待1秒
        let seconds = timeout.as_secs().max(1);
        // 出错的连接直接丢弃，不放回
        let result: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(lists)
            .arg(seconds)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        self.checkin_blocking(conn).await;
        if result.is_none() {
            debug!("Redis队列弹出超时: lists={:?}", lists);
        }
        Ok(result)
    }

    async fn try_pop(&self, list: &str) -> SchedulerResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("RPOP")
            .arg(list)
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn len(&self, list: &str) -> SchedulerResult<u64> {
        let mut conn = self.conn.clone();
        conn.llen(list).await.map_err(store_error)
    }

    async fn range(&self, list: &str) -> SchedulerResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.lrange(list, 0, -1).await.map_err(store_error)
    }

    async fn get(&self, key: &str) -> SchedulerResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(store_error)
    }

    async fn set(&self, key: &str, value: String) -> SchedulerResult<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("redis://:secret@cache:6379/0"),
            "redis://***@cache:6379/0"
        );
        assert_eq!(redact_url("redis://cache:6379"), "redis://cache:6379");
    }
}
