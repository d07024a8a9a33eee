use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("父任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("子任务未找到: {id}")]
    JobRecordNotFound { id: i64 },

    #[error("发布记录不存在: {id}")]
    ReleaseNotFound { id: i64 },

    #[error("发布任务不存在: {id}")]
    ReleaseTaskNotFound { id: i64 },

    #[error("主机未找到: {id}")]
    HostNotFound { id: i64 },

    #[error("任务模板未找到: {id}")]
    TemplateNotFound { id: i64 },

    #[error("Jenkins服务器未找到: {id}")]
    BuildServerNotFound { id: i64 },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("任务队列未运行")]
    QueueNotRunning,

    #[error("全局调度器未运行")]
    SchedulerNotRunning,

    #[error("任务存储错误: {0}")]
    JobStore(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("状态不允许该操作: {0}")]
    InvalidState(String),

    #[error("SSH连接/认证失败: {0}")]
    Connectivity(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("等待超时: {0}")]
    Timeout(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("获取资源失败: {0}")]
    AdmissionDenied(String),

    #[error("系统正在关闭")]
    Shutdown,

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl SchedulerError {
    /// 连接/认证类错误，由远程执行适配器自身重试
    pub fn is_connectivity(&self) -> bool {
        match self {
            SchedulerError::Connectivity(_) => true,
            SchedulerError::Network(msg) => is_connection_error_message(msg),
            _ => false,
        }
    }

    /// 派发类错误，进入重试队列而不直接失败
    pub fn is_dispatch_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::QueueNotRunning
                | SchedulerError::JobStore(_)
                | SchedulerError::AdmissionDenied(_)
                | SchedulerError::Database(_)
        )
    }
}

/// 判断错误信息是否属于连接/认证失败
pub fn is_connection_error_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("connection")
        || lower.contains("authentication")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || message.contains("认证")
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;
