//! 协作者的内存实现
//!
//! 记录存储、目标解析、远程执行适配器、构建系统和远程命令通道都有对应的mock，
//! 用于不依赖数据库、SSH或Jenkins的单元测试和集成测试。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::models::{
    BuildServer, CommandTemplate, ExecutionMode, HostConnection, Job, JobPayload, JobRecord,
    JobRecordPatch, JobStatus, NewParentTask, NewRelease, ParentTask, ParentTaskPatch, Release,
    ReleasePatch, ReleaseStatus, ReleaseTask, ReleaseTaskPatch, ReleaseTaskStatus, TaskType,
};
use scheduler_core::traits::{
    BuildResult, BuildStatus, BuildSystem, CommandOutput, ExecutionAdapter, ExecutionOutcome,
    LogChunk, ReleaseRepository, RemoteShell, TargetResolver, TaskRepository, TriggeredBuild,
};
use scheduler_core::{CancelSignal, SchedulerError, SchedulerResult};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct TaskState {
    tasks: BTreeMap<i64, ParentTask>,
    jobs: BTreeMap<i64, JobRecord>,
    next_task_id: i64,
    next_job_id: i64,
}

/// 父任务与子任务记录的内存存储
#[derive(Debug, Clone, Default)]
pub struct MockTaskRepository {
    state: Arc<Mutex<TaskState>>,
    fail_task_updates: Arc<AtomicBool>,
}

impl MockTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让后续的 `update_task` 调用失败
    pub fn set_fail_task_updates(&self, fail: bool) {
        self.fail_task_updates.store(fail, Ordering::SeqCst);
    }

    pub fn insert_task(&self, task: ParentTask) {
        let mut state = self.state.lock().unwrap();
        state.next_task_id = state.next_task_id.max(task.id);
        state.tasks.insert(task.id, task);
    }

    pub fn insert_job(&self, job: JobRecord) {
        let mut state = self.state.lock().unwrap();
        state.next_job_id = state.next_job_id.max(job.id);
        state.jobs.insert(job.id, job);
    }

    pub fn task(&self, id: i64) -> Option<ParentTask> {
        self.state.lock().unwrap().tasks.get(&id).cloned()
    }

    pub fn job(&self, id: i64) -> Option<JobRecord> {
        self.state.lock().unwrap().jobs.get(&id).cloned()
    }

    pub fn jobs_of(&self, task_id: i64) -> Vec<JobRecord> {
        self.state
            .lock()
            .unwrap()
            .jobs
            .values()
            .filter(|j| j.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn task_count(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn create_task(
        &self,
        request: &NewParentTask,
    ) -> SchedulerResult<(ParentTask, Vec<JobRecord>)> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        state.next_task_id += 1;
        let task = ParentTask {
            id: state.next_task_id,
            name: request.name.clone(),
            task_type: request.task_type,
            cron_expr: request.cron_expr.clone(),
            status: JobStatus::Pending,
            duration_secs: 0,
            task_count: request.jobs.len() as i64,
            execute_count: 0,
            next_run_time: None,
            start_time: None,
            end_time: None,
            remark: request.remark.clone(),
            created_at: now,
        };
        let mut jobs = Vec::with_capacity(request.jobs.len());
        for payload in &request.jobs {
            state.next_job_id += 1;
            let job = JobRecord {
                id: state.next_job_id,
                task_id: task.id,
                payload: payload.clone(),
                status: JobStatus::Pending,
                start_time: None,
                end_time: None,
                duration_secs: 0,
                log: None,
                log_path: None,
                error_message: None,
                created_at: now,
            };
            state.jobs.insert(job.id, job.clone());
            jobs.push(job);
        }
        state.tasks.insert(task.id, task.clone());
        Ok((task, jobs))
    }

    async fn get_task(&self, id: i64) -> SchedulerResult<Option<ParentTask>> {
        Ok(self.task(id))
    }

    async fn update_task(&self, id: i64, patch: &ParentTaskPatch) -> SchedulerResult<()> {
        if self.fail_task_updates.load(Ordering::SeqCst) {
            return Err(SchedulerError::Internal("模拟更新失败".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound { id })?;
        patch.apply(task);
        Ok(())
    }

    async fn list_tasks_by_type(&self, task_type: TaskType) -> SchedulerResult<Vec<ParentTask>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|t| t.task_type == task_type)
            .cloned()
            .collect())
    }

    async fn increment_execute_count(&self, id: i64) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound { id })?;
        task.execute_count += 1;
        Ok(())
    }

    async fn delete_task(&self, id: i64) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.tasks.remove(&id).is_none() {
            return Err(SchedulerError::TaskNotFound { id });
        }
        state.jobs.retain(|_, job| job.task_id != id);
        Ok(())
    }

    async fn get_job(&self, id: i64) -> SchedulerResult<Option<JobRecord>> {
        Ok(self.job(id))
    }

    async fn get_jobs_by_task(&self, task_id: i64) -> SchedulerResult<Vec<JobRecord>> {
        Ok(self.jobs_of(task_id))
    }

    async fn find_active_jobs(&self, task_id: i64) -> SchedulerResult<Vec<JobRecord>> {
        Ok(self
            .jobs_of(task_id)
            .into_iter()
            .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Running))
            .collect())
    }

    async fn update_job(&self, id: i64, patch: &JobRecordPatch) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(SchedulerError::JobRecordNotFound { id })?;
        patch.apply(job);
        Ok(())
    }

    async fn claim_job(&self, id: i64, start_time: DateTime<Utc>) -> SchedulerResult<bool> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or(SchedulerError::JobRecordNotFound { id })?;
        if job.is_terminal() {
            return Ok(false);
        }
        job.status = JobStatus::Running;
        job.start_time = Some(start_time);
        Ok(true)
    }
}

#[derive(Debug, Default)]
struct ReleaseState {
    releases: BTreeMap<i64, Release>,
    tasks: BTreeMap<i64, ReleaseTask>,
    next_release_id: i64,
    next_task_id: i64,
}

/// 发布与发布任务的内存存储
#[derive(Debug, Clone, Default)]
pub struct MockReleaseRepository {
    state: Arc<Mutex<ReleaseState>>,
}

impl MockReleaseRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self, id: i64) -> Option<Release> {
        self.state.lock().unwrap().releases.get(&id).cloned()
    }

    pub fn tasks_of(&self, release_id: i64) -> Vec<ReleaseTask> {
        let mut tasks: Vec<ReleaseTask> = self
            .state
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|t| t.release_id == release_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.execute_order, t.id));
        tasks
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().unwrap().releases.len()
    }
}

#[async_trait]
impl ReleaseRepository for MockReleaseRepository {
    async fn create_release(
        &self,
        request: &NewRelease,
    ) -> SchedulerResult<(Release, Vec<ReleaseTask>)> {
        let mut state = self.state.lock().unwrap();
        state.next_release_id += 1;
        let release = Release {
            id: state.next_release_id,
            title: request.title.clone(),
            description: request.description.clone(),
            status: ReleaseStatus::NotDeployed,
            task_count: request.tasks.len() as i64,
            execution_mode: ExecutionMode::default(),
            start_time: None,
            end_time: None,
            duration_secs: 0,
            created_at: Utc::now(),
        };
        let mut tasks = Vec::with_capacity(request.tasks.len());
        for (index, item) in request.tasks.iter().enumerate() {
            state.next_task_id += 1;
            let task = ReleaseTask {
                id: state.next_task_id,
                release_id: release.id,
                app_name: item.app_name.clone(),
                app_code: item.app_code.clone(),
                environment: item.environment.clone(),
                server_id: item.server_id,
                job_name: item.job_name.clone(),
                execute_order: index as i64 + 1,
                status: ReleaseTaskStatus::NotDeployed,
                build_number: None,
                log_url: None,
                error_message: None,
                start_time: None,
                end_time: None,
                duration_secs: 0,
            };
            state.tasks.insert(task.id, task.clone());
            tasks.push(task);
        }
        state.releases.insert(release.id, release.clone());
        Ok((release, tasks))
    }

    async fn get_release(&self, id: i64) -> SchedulerResult<Option<Release>> {
        Ok(self.release(id))
    }

    async fn update_release(&self, id: i64, patch: &ReleasePatch) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        let release = state
            .releases
            .get_mut(&id)
            .ok_or(SchedulerError::ReleaseNotFound { id })?;
        patch.apply(release);
        Ok(())
    }

    async fn delete_release(&self, id: i64) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.releases.remove(&id).is_none() {
            return Err(SchedulerError::ReleaseNotFound { id });
        }
        state.tasks.retain(|_, t| t.release_id != id);
        Ok(())
    }

    async fn get_release_task(&self, id: i64) -> SchedulerResult<Option<ReleaseTask>> {
        Ok(self.state.lock().unwrap().tasks.get(&id).cloned())
    }

    async fn get_release_tasks(&self, release_id: i64) -> SchedulerResult<Vec<ReleaseTask>> {
        Ok(self.tasks_of(release_id))
    }

    async fn update_release_task(&self, id: i64, patch: &ReleaseTaskPatch) -> SchedulerResult<()> {
        let mut state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::ReleaseTaskNotFound { id })?;
        patch.apply(task);
        Ok(())
    }
}

/// 固定内容的目标解析
#[derive(Debug, Clone, Default)]
pub struct MockTargetResolver {
    hosts: HashMap<i64, HostConnection>,
    templates: HashMap<i64, CommandTemplate>,
    servers: HashMap<i64, BuildServer>,
}

impl MockTargetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: HostConnection) -> Self {
        self.hosts.insert(host.host_id, host);
        self
    }

    pub fn with_template(mut self, id: i64, content: &str) -> Self {
        self.templates.insert(
            id,
            CommandTemplate {
                id,
                name: format!("template-{id}"),
                content: content.to_string(),
            },
        );
        self
    }

    pub fn with_build_server(mut self, id: i64, base_url: &str) -> Self {
        self.servers.insert(
            id,
            BuildServer {
                id,
                base_url: base_url.to_string(),
                username: "ci".to_string(),
                token: "token".to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl TargetResolver for MockTargetResolver {
    async fn resolve_host(&self, host_id: i64) -> SchedulerResult<HostConnection> {
        self.hosts
            .get(&host_id)
            .cloned()
            .ok_or(SchedulerError::HostNotFound { id: host_id })
    }

    async fn resolve_template(&self, template_id: i64) -> SchedulerResult<CommandTemplate> {
        self.templates
            .get(&template_id)
            .cloned()
            .ok_or(SchedulerError::TemplateNotFound { id: template_id })
    }

    async fn resolve_build_server(&self, server_id: i64) -> SchedulerResult<BuildServer> {
        self.servers
            .get(&server_id)
            .cloned()
            .ok_or(SchedulerError::BuildServerNotFound { id: server_id })
    }
}

/// 预设的单次执行结果
#[derive(Debug, Clone)]
pub enum MockStep {
    Outcome(ExecutionOutcome),
    /// 返回 `SchedulerError::Connectivity`
    Connectivity(String),
    /// 返回 `SchedulerError::TaskExecution`
    Error(String),
}

/// 可编排结果并统计并发的执行适配器
pub struct MockAdapter {
    name: String,
    kind: Option<&'static str>,
    delay: Duration,
    steps: Mutex<VecDeque<MockStep>>,
    invocations: AtomicUsize,
    current: AtomicUsize,
    high_water: AtomicUsize,
    per_target: Mutex<HashMap<String, (usize, usize)>>,
    executed: Mutex<Vec<i64>>,
    killed: Mutex<Vec<i64>>,
}

impl MockAdapter {
    /// 支持所有载荷，默认立即成功
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            kind: None,
            delay: Duration::ZERO,
            steps: Mutex::new(VecDeque::new()),
            invocations: AtomicUsize::new(0),
            current: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            per_target: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
        }
    }

    /// 只支持 `command` 或 `build` 载荷
    pub fn for_kind(mut self, kind: &'static str) -> Self {
        self.name = format!("mock-{kind}");
        self.kind = Some(kind);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_steps(self, steps: impl IntoIterator<Item = MockStep>) -> Self {
        self.steps.lock().unwrap().extend(steps);
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// 观察到的最大同时执行数
    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }

    pub fn target_high_water(&self, target_key: &str) -> usize {
        self.per_target
            .lock()
            .unwrap()
            .get(target_key)
            .map(|(_, high)| *high)
            .unwrap_or(0)
    }

    /// 执行顺序（子任务记录ID）
    pub fn executed(&self) -> Vec<i64> {
        self.executed.lock().unwrap().clone()
    }

    pub fn killed(&self) -> Vec<i64> {
        self.killed.lock().unwrap().clone()
    }

    fn enter(&self, target_key: &str) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        let mut per_target = self.per_target.lock().unwrap();
        let entry = per_target.entry(target_key.to_string()).or_insert((0, 0));
        entry.0 += 1;
        entry.1 = entry.1.max(entry.0);
    }

    fn leave(&self, target_key: &str) {
        self.current.fetch_sub(1, Ordering::SeqCst);
        if let Some(entry) = self.per_target.lock().unwrap().get_mut(target_key) {
            entry.0 -= 1;
        }
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, payload: &JobPayload) -> bool {
        self.kind.map(|k| k == payload.kind()).unwrap_or(true)
    }

    async fn execute(&self, job: &Job, mut cancel: CancelSignal) -> SchedulerResult<ExecutionOutcome> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(job.record_id);
        let target_key = job.target_key();
        self.enter(&target_key);

        let interrupted = if self.delay.is_zero() {
            false
        } else {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => false,
                _ = cancel.cancelled() => true,
            }
        };
        self.leave(&target_key);
        if interrupted {
            return Err(SchedulerError::Shutdown);
        }

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            None => Ok(ExecutionOutcome::succeeded(Some(format!(
                "record {} ok",
                job.record_id
            )))),
            Some(MockStep::Outcome(outcome)) => Ok(outcome),
            Some(MockStep::Connectivity(message)) => Err(SchedulerError::Connectivity(message)),
            Some(MockStep::Error(message)) => Err(SchedulerError::TaskExecution(message)),
        }
    }

    async fn kill(&self, job: &Job) -> SchedulerResult<()> {
        self.killed.lock().unwrap().push(job.record_id);
        Ok(())
    }
}

/// 可编排的构建系统
pub struct MockBuildSystem {
    trigger_error: Option<String>,
    failing_jobs: HashSet<String>,
    result: Option<String>,
    build_number: AtomicI64,
    monitor_delay: Duration,
    trigger_calls: AtomicUsize,
    wait_calls: AtomicUsize,
    status_calls: AtomicUsize,
    log: String,
}

impl MockBuildSystem {
    /// 触发成功，构建结果为 `SUCCESS`
    pub fn new() -> Self {
        Self {
            trigger_error: None,
            failing_jobs: HashSet::new(),
            result: Some("SUCCESS".to_string()),
            build_number: AtomicI64::new(0),
            monitor_delay: Duration::ZERO,
            trigger_calls: AtomicUsize::new(0),
            wait_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            log: "Started by user ci\nFinished".to_string(),
        }
    }

    pub fn with_result(mut self, result: &str) -> Self {
        self.result = Some(result.to_string());
        self
    }

    /// 所有触发请求都失败
    pub fn failing_trigger(mut self, message: &str) -> Self {
        self.trigger_error = Some(message.to_string());
        self
    }

    /// 只有该任务的触发请求失败
    pub fn failing_job(mut self, job_name: &str) -> Self {
        self.failing_jobs.insert(job_name.to_string());
        self
    }

    pub fn with_monitor_delay(mut self, delay: Duration) -> Self {
        self.monitor_delay = delay;
        self
    }

    pub fn trigger_calls(&self) -> usize {
        self.trigger_calls.load(Ordering::SeqCst)
    }

    pub fn wait_calls(&self) -> usize {
        self.wait_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockBuildSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BuildSystem for MockBuildSystem {
    async fn trigger(&self, server: &BuildServer, job_name: &str) -> SchedulerResult<TriggeredBuild> {
        self.trigger_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.trigger_error {
            return Err(SchedulerError::TaskExecution(message.clone()));
        }
        if self.failing_jobs.contains(job_name) {
            return Err(SchedulerError::TaskExecution(format!(
                "触发Jenkins构建失败，状态码: 500: {job_name}"
            )));
        }
        let number = self.build_number.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TriggeredBuild {
            build_number: number,
            log_url: format!("{}/job/{}/{}/console", server.base_url(), job_name, number),
        })
    }

    async fn build_status(
        &self,
        server: &BuildServer,
        job_name: &str,
        build_number: i64,
    ) -> SchedulerResult<BuildStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(BuildStatus {
            building: false,
            result: self.result.clone(),
            url: format!("{}/job/{}/{}/", server.base_url(), job_name, build_number),
        })
    }

    async fn wait_for_completion(
        &self,
        _server: &BuildServer,
        _job_name: &str,
        _build_number: i64,
        mut cancel: CancelSignal,
    ) -> SchedulerResult<BuildResult> {
        self.wait_calls.fetch_add(1, Ordering::SeqCst);
        if !self.monitor_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.monitor_delay) => {}
                _ = cancel.cancelled() => return Err(SchedulerError::Shutdown),
            }
        }
        Ok(BuildResult::from_result(self.result.as_deref()))
    }

    async fn fetch_log(
        &self,
        _server: &BuildServer,
        _job_name: &str,
        _build_number: i64,
        start: u64,
    ) -> SchedulerResult<LogChunk> {
        let offset = (start as usize).min(self.log.len());
        let log = self.log[offset..].to_string();
        Ok(LogChunk {
            text_size: self.log.len() as u64,
            log,
            has_more: false,
        })
    }
}

type ShellHandler = Box<dyn Fn(&str) -> SchedulerResult<CommandOutput> + Send + Sync>;

/// 记录命令并按处理函数返回结果的远程通道
pub struct MockRemoteShell {
    handler: ShellHandler,
    commands: Mutex<Vec<String>>,
}

impl MockRemoteShell {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str) -> SchedulerResult<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// 每次调用都返回连接/认证错误
    pub fn unreachable(message: &str) -> Self {
        let message = message.to_string();
        Self::new(move |_| Err(SchedulerError::Connectivity(message.clone())))
    }

    /// 按后台执行约定应答：进程立即结束，日志与退出码为给定值
    pub fn completing(exit_code: i32, log: &str) -> Self {
        let log = log.to_string();
        Self::new(move |command| {
            let stdout = if command.starts_with("ps -p") {
                "exited\n".to_string()
            } else if command.starts_with("cat ") && command.contains(".pid ") {
                "4242\n".to_string()
            } else if command.starts_with("cat ") && command.contains(".log ") {
                log.clone()
            } else if command.starts_with("cat ") && command.contains(".exit ") {
                format!("{exit_code}\n")
            } else {
                String::new()
            };
            Ok(CommandOutput {
                exit_code: 0,
                stdout,
                stderr: String::new(),
            })
        })
    }

    /// 已执行的命令
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteShell for MockRemoteShell {
    async fn run(&self, _host: &HostConnection, command: &str) -> SchedulerResult<CommandOutput> {
        self.commands.lock().unwrap().push(command.to_string());
        (self.handler)(command)
    }
}
