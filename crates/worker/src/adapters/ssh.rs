//! SSH命令执行适配器
//!
//! 远程执行约定：
//!
//! ```text
//! {tmp}/task_{task}_{template}.sh    脚本内容
//! {tmp}/task_{task}_{template}.pid   后台进程号，出现即代表进程已启动
//! {tmp}/task_{task}_{template}.log   标准输出与标准错误
//! {tmp}/task_{task}_{template}.exit  脚本退出码
//! ```
//!
//! 脚本以 `nohup` 后台运行，适配器依次轮询pid文件、进程存活，
//! 最后读取日志与退出码并清理临时文件。每个轮询都有次数或时间上限。

use async_trait::async_trait;
use scheduler_config::SshConfig;
use scheduler_core::models::{HostAuth, HostConnection, Job, JobPayload};
use scheduler_core::traits::{
    CommandOutput, ExecutionAdapter, ExecutionOutcome, RemoteShell, TargetResolver,
};
use scheduler_core::{CancelSignal, SchedulerError, SchedulerResult};
use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::sleep_or_cancel;

const HEREDOC_MARKER: &str = "DEVOPS_SCHEDULER_EOF";

/// 远程临时文件路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePaths {
    pub dir: String,
    pub script: String,
    pub pid: String,
    pub log: String,
    pub exit: String,
}

impl RemotePaths {
    pub fn new(temp_dir: &str, task_id: i64, template_id: i64) -> Self {
        let dir = match temp_dir.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        let base = format!("{}/task_{}_{}", dir.trim_end_matches('/'), task_id, template_id);
        Self {
            dir,
            script: format!("{base}.sh"),
            pid: format!("{base}.pid"),
            log: format!("{base}.log"),
            exit: format!("{base}.exit"),
        }
    }

    /// 写入脚本并后台启动，进程号写入pid文件
    pub fn launch_command(&self, content: &str) -> String {
        let body = content.trim_end_matches('\n');
        format!(
            "mkdir -p {dir} && rm -f {pid} {log} {exit} && cat > {script} <<'{marker}'\n\
             {body}\n\
             {marker}\n\
             nohup sh -c 'sh {script}; echo $? > {exit}' > {log} 2>&1 < /dev/null &\n\
             echo $! > {pid}",
            dir = self.dir,
            pid = self.pid,
            log = self.log,
            exit = self.exit,
            script = self.script,
            marker = HEREDOC_MARKER,
        )
    }

    pub fn read_pid_command(&self) -> String {
        format!("cat {} 2>/dev/null", self.pid)
    }

    pub fn read_log_command(&self) -> String {
        format!("cat {} 2>/dev/null", self.log)
    }

    pub fn read_exit_command(&self) -> String {
        format!("cat {} 2>/dev/null", self.exit)
    }

    pub fn kill_command(&self) -> String {
        format!("kill -9 $(cat {} 2>/dev/null) 2>/dev/null; true", self.pid)
    }

    pub fn cleanup_command(&self) -> String {
        format!(
            "rm -f {} {} {} {}",
            self.script, self.pid, self.log, self.exit
        )
    }
}

pub fn liveness_command(pid: u32) -> String {
    format!("ps -p {pid} > /dev/null 2>&1 && echo running || echo exited")
}

/// 在主机上执行命令模板
pub struct SshAdapter {
    shell: Arc<dyn RemoteShell>,
    resolver: Arc<dyn TargetResolver>,
    config: SshConfig,
}

impl SshAdapter {
    pub fn new(
        shell: Arc<dyn RemoteShell>,
        resolver: Arc<dyn TargetResolver>,
        config: SshConfig,
    ) -> Self {
        Self {
            shell,
            resolver,
            config,
        }
    }

    /// 连接类错误在适配器内重试，其余错误直接返回
    async fn run_with_retry(
        &self,
        host: &HostConnection,
        command: &str,
        cancel: &mut CancelSignal,
    ) -> SchedulerResult<CommandOutput> {
        let attempts = self.config.connect_retries + 1;
        let mut attempt = 1;
        loop {
            match self.shell.run(host, command).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_connectivity() => {
                    let message = match e {
                        SchedulerError::Connectivity(message) | SchedulerError::Network(message) => {
                            message
                        }
                        other => other.to_string(),
                    };
                    if attempt >= attempts {
                        return Err(SchedulerError::Connectivity(format!(
                            "{}:{} 重试{}次后仍然失败: {}",
                            host.address, host.port, self.config.connect_retries, message
                        )));
                    }
                    warn!(
                        "SSH连接失败，准备重试: host={}, attempt={}/{}, error={}",
                        host.address, attempt, attempts, message
                    );
                    attempt += 1;
                    sleep_or_cancel(self.config.connect_retry_delay(), cancel).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn wait_for_pid(
        &self,
        host: &HostConnection,
        paths: &RemotePaths,
        cancel: &mut CancelSignal,
    ) -> SchedulerResult<Option<u32>> {
        for attempt in 1..=self.config.pid_poll_attempts {
            sleep_or_cancel(self.config.pid_poll_interval(), cancel).await?;
            let output = self
                .run_with_retry(host, &paths.read_pid_command(), cancel)
                .await?;
            if output.success() {
                if let Ok(pid) = output.stdout.trim().parse::<u32>() {
                    return Ok(Some(pid));
                }
            }
            debug!(
                "PID文件尚未就绪: host={}, attempt={}/{}",
                host.address, attempt, self.config.pid_poll_attempts
            );
        }
        Ok(None)
    }

    /// 进程退出返回 `true`，超过最长等待时间返回 `false`
    async fn wait_for_exit(
        &self,
        host: &HostConnection,
        pid: u32,
        cancel: &mut CancelSignal,
    ) -> SchedulerResult<bool> {
        let deadline = Instant::now() + self.config.max_wait();
        let command = liveness_command(pid);
        loop {
            let output = self.run_with_retry(host, &command, cancel).await?;
            if output.stdout.trim() == "exited" {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep_or_cancel(self.config.liveness_poll_interval(), cancel).await?;
        }
    }

    async fn best_effort(&self, host: &HostConnection, command: &str, action: &str) {
        match self.shell.run(host, command).await {
            Ok(output) if !output.success() => warn!(
                "{}失败: host={}, exit_code={}",
                action, host.address, output.exit_code
            ),
            Err(e) => warn!("{}失败: host={}, error={}", action, host.address, e),
            Ok(_) => {}
        }
    }

    async fn resolve(
        &self,
        host_id: i64,
        template_id: i64,
    ) -> SchedulerResult<Result<(HostConnection, String), String>> {
        let host = match self.resolver.resolve_host(host_id).await {
            Ok(host) => host,
            Err(e @ SchedulerError::HostNotFound { .. }) => return Ok(Err(e.to_string())),
            Err(e) => return Err(e),
        };
        let template = match self.resolver.resolve_template(template_id).await {
            Ok(template) => template,
            Err(e @ SchedulerError::TemplateNotFound { .. }) => return Ok(Err(e.to_string())),
            Err(e) => return Err(e),
        };
        Ok(Ok((host, template.content)))
    }
}

#[async_trait]
impl ExecutionAdapter for SshAdapter {
    fn name(&self) -> &str {
        "ssh"
    }

    fn supports(&self, payload: &JobPayload) -> bool {
        matches!(payload, JobPayload::Command { .. })
    }

    async fn execute(&self, job: &Job, mut cancel: CancelSignal) -> SchedulerResult<ExecutionOutcome> {
        let JobPayload::Command {
            host_id,
            template_id,
        } = &job.payload
        else {
            return Err(SchedulerError::TaskExecution(format!(
                "SSH适配器不支持的任务类型: {}",
                job.payload.kind()
            )));
        };

        let (host, content) = match self.resolve(*host_id, *template_id).await? {
            Ok(resolved) => resolved,
            Err(cause) => return Ok(ExecutionOutcome::failed(cause)),
        };
        let paths = RemotePaths::new(&self.config.remote_temp_dir, job.task_id, *template_id);

        info!(
            "开始执行SSH任务: record_id={}, host={}:{}, template_id={}",
            job.record_id, host.address, host.port, template_id
        );

        let launched = self
            .run_with_retry(&host, &paths.launch_command(&content), &mut cancel)
            .await?;
        if !launched.success() {
            self.best_effort(&host, &paths.cleanup_command(), "清理临时文件")
                .await;
            return Ok(ExecutionOutcome::failed(format!(
                "脚本启动失败，退出码: {}: {}",
                launched.exit_code,
                launched.stderr.trim()
            )));
        }

        let Some(pid) = self.wait_for_pid(&host, &paths, &mut cancel).await? else {
            self.best_effort(&host, &paths.cleanup_command(), "清理临时文件")
                .await;
            return Ok(ExecutionOutcome::failed("后台进程未启动，未检测到PID文件"));
        };
        debug!("后台进程已启动: record_id={}, pid={}", job.record_id, pid);

        match self.wait_for_exit(&host, pid, &mut cancel).await {
            Ok(true) => {}
            Ok(false) => {
                self.best_effort(&host, &paths.kill_command(), "终止超时进程")
                    .await;
                let log = self
                    .shell
                    .run(&host, &paths.read_log_command())
                    .await
                    .map(|o| o.stdout)
                    .unwrap_or_default();
                self.best_effort(&host, &paths.cleanup_command(), "清理临时文件")
                    .await;
                return Ok(ExecutionOutcome::failed(format!(
                    "命令执行超时，超过{}秒",
                    self.config.max_wait_seconds
                ))
                .with_log(log));
            }
            Err(SchedulerError::Shutdown) => {
                self.best_effort(&host, &paths.kill_command(), "终止远程进程")
                    .await;
                return Err(SchedulerError::Shutdown);
            }
            Err(e) => return Err(e),
        }

        let log = self
            .run_with_retry(&host, &paths.read_log_command(), &mut cancel)
            .await?
            .stdout;
        let exit_output = self
            .run_with_retry(&host, &paths.read_exit_command(), &mut cancel)
            .await?;
        let exit_code = exit_output.stdout.trim().parse::<i32>().unwrap_or(-1);
        self.best_effort(&host, &paths.cleanup_command(), "清理临时文件")
            .await;

        if exit_code == 0 {
            info!("SSH任务执行成功: record_id={}", job.record_id);
            Ok(ExecutionOutcome::succeeded(Some(log)))
        } else {
            warn!(
                "SSH任务执行失败: record_id={}, exit_code={}",
                job.record_id, exit_code
            );
            Ok(ExecutionOutcome::failed(format!("命令执行失败，退出码: {exit_code}")).with_log(log))
        }
    }

    async fn kill(&self, job: &Job) -> SchedulerResult<()> {
        let JobPayload::Command {
            host_id,
            template_id,
        } = &job.payload
        else {
            return Ok(());
        };
        let host = self.resolver.resolve_host(*host_id).await?;
        let paths = RemotePaths::new(&self.config.remote_temp_dir, job.task_id, *template_id);
        let output = self.shell.run(&host, &paths.kill_command()).await?;
        info!(
            "已发送终止信号: record_id={}, host={}, exit_code={}",
            job.record_id, host.address, output.exit_code
        );
        Ok(())
    }
}

/// 基于系统 `ssh` 命令的远程通道
///
/// 密码认证通过 `sshpass -e` 传入，私钥写入仅当前用户可读的临时文件。
pub struct OpenSshShell {
    ssh_binary: String,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl OpenSshShell {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            ssh_binary: config.ssh_binary.clone(),
            connect_timeout: config.connect_timeout(),
            command_timeout: config.connect_timeout() * 2 + Duration::from_secs(30),
        }
    }

    fn base_command(&self, host: &HostConnection) -> Command {
        let mut cmd = match &host.auth {
            HostAuth::Password(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg(&self.ssh_binary);
                cmd.env("SSHPASS", password);
                cmd
            }
            _ => {
                let mut cmd = Command::new(&self.ssh_binary);
                cmd.arg("-o").arg("BatchMode=yes");
                cmd
            }
        };
        cmd.arg("-p")
            .arg(host.port.to_string())
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("LogLevel=ERROR")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)));
        cmd
    }
}

#[async_trait]
impl RemoteShell for OpenSshShell {
    async fn run(&self, host: &HostConnection, command: &str) -> SchedulerResult<CommandOutput> {
        let mut cmd = self.base_command(host);

        // 临时私钥文件需要活到命令结束
        let _key_file = match &host.auth {
            HostAuth::PrivateKey(key) => {
                let mut file = tempfile::NamedTempFile::new()
                    .map_err(|e| SchedulerError::TaskExecution(format!("创建私钥临时文件失败: {e}")))?;
                file.write_all(key.as_bytes())
                    .map_err(|e| SchedulerError::TaskExecution(format!("写入私钥临时文件失败: {e}")))?;
                cmd.arg("-i")
                    .arg(file.path())
                    .arg("-o")
                    .arg("IdentitiesOnly=yes");
                Some(file)
            }
            _ => None,
        };

        cmd.arg(format!("{}@{}", host.username, host.address))
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.command_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SchedulerError::TaskExecution(format!(
                    "启动ssh进程失败: {e}"
                )))
            }
            Err(_) => {
                return Err(SchedulerError::Connectivity(format!(
                    "SSH命令执行超时 ({}s): {}",
                    self.command_timeout.as_secs(),
                    host.address
                )))
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        // ssh 自身失败返回255；sshpass 密码错误返回5
        match (&host.auth, exit_code) {
            (_, 255) => Err(SchedulerError::Connectivity(format!(
                "{}: {}",
                host.address,
                stderr.trim()
            ))),
            (HostAuth::Password(_), 5) => Err(SchedulerError::Connectivity(format!(
                "{}: 认证失败，密码错误",
                host.address
            ))),
            _ => Ok(CommandOutput {
                exit_code,
                stdout,
                stderr,
            }),
        }
    }
}
