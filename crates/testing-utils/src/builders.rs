//! 测试数据构建器，提供合理的默认值

use chrono::{DateTime, Utc};
use scheduler_core::models::{
    HostAuth, HostConnection, JobPayload, JobRecord, JobStatus, NewRelease, NewReleaseTask,
    ParentTask, TaskType,
};

pub struct ParentTaskBuilder {
    task: ParentTask,
}

impl ParentTaskBuilder {
    pub fn new() -> Self {
        Self {
            task: ParentTask {
                id: 1,
                name: "test_task".to_string(),
                task_type: TaskType::Immediate,
                cron_expr: None,
                status: JobStatus::Pending,
                duration_secs: 0,
                task_count: 0,
                execute_count: 0,
                next_run_time: None,
                start_time: None,
                end_time: None,
                remark: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task.task_type = task_type;
        self
    }

    /// 定时任务
    pub fn scheduled(mut self, cron_expr: &str) -> Self {
        self.task.task_type = TaskType::Scheduled;
        self.task.cron_expr = Some(cron_expr.to_string());
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_task_count(mut self, count: i64) -> Self {
        self.task.task_count = count;
        self
    }

    pub fn with_next_run_time(mut self, next: DateTime<Utc>) -> Self {
        self.task.next_run_time = Some(next);
        self
    }

    pub fn build(self) -> ParentTask {
        self.task
    }
}

impl Default for ParentTaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct JobRecordBuilder {
    job: JobRecord,
}

impl JobRecordBuilder {
    pub fn new() -> Self {
        Self {
            job: JobRecord {
                id: 1,
                task_id: 1,
                payload: JobPayload::Command {
                    host_id: 1,
                    template_id: 1,
                },
                status: JobStatus::Pending,
                start_time: None,
                end_time: None,
                duration_secs: 0,
                log: None,
                log_path: None,
                error_message: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.job.id = id;
        self
    }

    pub fn with_task_id(mut self, task_id: i64) -> Self {
        self.job.task_id = task_id;
        self
    }

    pub fn command(mut self, host_id: i64, template_id: i64) -> Self {
        self.job.payload = JobPayload::Command {
            host_id,
            template_id,
        };
        self
    }

    pub fn build_job(mut self, server_id: i64, job_name: &str) -> Self {
        self.job.payload = JobPayload::Build {
            server_id,
            job_name: job_name.to_string(),
        };
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    pub fn started_at(mut self, start: DateTime<Utc>) -> Self {
        self.job.start_time = Some(start);
        self
    }

    pub fn with_duration(mut self, seconds: i64) -> Self {
        self.job.duration_secs = seconds;
        self
    }

    pub fn with_log(mut self, log: &str) -> Self {
        self.job.log = Some(log.to_string());
        self
    }

    pub fn build(self) -> JobRecord {
        self.job
    }
}

impl Default for JobRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 构建 `NewRelease` 请求
pub struct ReleaseBuilder {
    release: NewRelease,
}

impl ReleaseBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            release: NewRelease {
                title: title.to_string(),
                description: None,
                tasks: Vec::new(),
            },
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.release.description = Some(description.to_string());
        self
    }

    /// 追加一个应用，执行顺序按追加顺序
    pub fn with_app(mut self, app_code: &str, environment: &str, server_id: i64) -> Self {
        self.release.tasks.push(NewReleaseTask {
            app_name: format!("{app_code}-service"),
            app_code: app_code.to_string(),
            environment: environment.to_string(),
            server_id,
            job_name: format!("{app_code}-{environment}"),
        });
        self
    }

    pub fn build(self) -> NewRelease {
        self.release
    }
}

pub struct HostBuilder {
    host: HostConnection,
}

impl HostBuilder {
    pub fn new(host_id: i64) -> Self {
        Self {
            host: HostConnection {
                host_id,
                address: format!("10.0.0.{host_id}"),
                port: 22,
                username: "root".to_string(),
                auth: HostAuth::Agent,
            },
        }
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.host.address = address.to_string();
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.host.auth = HostAuth::Password(password.to_string());
        self
    }

    pub fn with_private_key(mut self, key: &str) -> Self {
        self.host.auth = HostAuth::PrivateKey(key.to_string());
        self
    }

    pub fn build(self) -> HostConnection {
        self.host
    }
}
