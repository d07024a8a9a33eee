use std::time::Duration;

use async_trait::async_trait;

use crate::Result;

/// 任务存储抽象
///
/// 提供带超时的列表推入/弹出原语（LPUSH/BRPOP 语义）以及简单的键值读写。
/// 推入从列表头部插入，弹出从尾部取出，同一列表内保持先进先出。
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 推入列表头部
    async fn push(&self, list: &str, payload: String) -> Result<()>;

    /// 按给定顺序检查多个列表，弹出第一个非空列表的尾部元素
    ///
    /// 超时内没有数据时返回 `None`。返回值为 (列表名, 载荷)。
    async fn pop(&self, lists: &[String], timeout: Duration) -> Result<Option<(String, String)>>;

    /// 非阻塞弹出单个列表的尾部元素
    async fn try_pop(&self, list: &str) -> Result<Option<String>>;

    /// 列表长度
    async fn len(&self, list: &str) -> Result<u64>;

    /// 列表全部元素（从头到尾），仅用于人工检查
    async fn range(&self, list: &str) -> Result<Vec<String>>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> Result<()>;
}
