//! Jenkins构建触发适配器
//!
//! 触发流程：获取CSRF crumb → 记录最新构建号作为基准 → POST build →
//! 轮询最新构建号直到超过基准值（区分“已接受”和“被静默忽略”）→
//! 轮询构建状态直到 `building == false`。

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use scheduler_config::JenkinsConfig;
use scheduler_core::models::{BuildServer, Job, JobPayload};
use scheduler_core::traits::{
    BuildResult, BuildStatus, BuildSystem, ExecutionAdapter, ExecutionOutcome, LogChunk,
    TargetResolver, TriggeredBuild,
};
use scheduler_core::{CancelSignal, SchedulerError, SchedulerResult};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::sleep_or_cancel;

/// `job/a/job/b` 形式的任务路径，支持文件夹
pub fn job_path(job_name: &str) -> String {
    job_name
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| format!("job/{segment}"))
        .collect::<Vec<_>>()
        .join("/")
}

fn network_error(context: &str, err: reqwest::Error) -> SchedulerError {
    if err.is_timeout() {
        SchedulerError::Network(format!("{context}: request timeout: {err}"))
    } else if err.is_connect() {
        SchedulerError::Network(format!("{context}: connection failed: {err}"))
    } else {
        SchedulerError::Network(format!("{context}: {err}"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrumbResponse {
    crumb_request_field: String,
    crumb: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastBuildResponse {
    last_build: Option<BuildNumber>,
}

#[derive(Debug, Deserialize)]
struct BuildNumber {
    number: i64,
}

#[derive(Debug, Deserialize)]
struct BuildStatusResponse {
    #[serde(default)]
    building: bool,
    result: Option<String>,
    #[serde(default)]
    url: String,
}

/// Jenkins REST客户端
pub struct JenkinsClient {
    http: Client,
    config: JenkinsConfig,
}

impl JenkinsClient {
    pub fn new(config: JenkinsConfig) -> SchedulerResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { http, config })
    }

    fn get(&self, server: &BuildServer, url: String) -> RequestBuilder {
        self.http
            .get(url)
            .basic_auth(&server.username, Some(&server.token))
    }

    fn job_url(server: &BuildServer, job_name: &str) -> String {
        format!("{}/{}", server.base_url(), job_path(job_name))
    }

    /// 没有启用CSRF保护（404）时返回 `None`
    async fn crumb(&self, server: &BuildServer) -> SchedulerResult<Option<(String, String)>> {
        let url = format!("{}/crumbIssuer/api/json", server.base_url());
        let response = self
            .get(server, url)
            .send()
            .await
            .map_err(|e| network_error("获取Jenkins crumb失败", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("Jenkins未启用crumb: server_id={}", server.id);
            return Ok(None);
        }
        if !response.status().is_success() {
            warn!(
                "获取Jenkins crumb失败: server_id={}, status={}",
                server.id,
                response.status()
            );
            return Ok(None);
        }
        let crumb: CrumbResponse = response
            .json()
            .await
            .map_err(|e| network_error("解析Jenkins crumb失败", e))?;
        Ok(Some((crumb.crumb_request_field, crumb.crumb)))
    }

    /// 最新构建号，没有任何构建时为0
    pub async fn last_build_number(
        &self,
        server: &BuildServer,
        job_name: &str,
    ) -> SchedulerResult<i64> {
        let url = format!(
            "{}/api/json?tree=lastBuild[number]",
            Self::job_url(server, job_name)
        );
        let response = self
            .get(server, url)
            .send()
            .await
            .map_err(|e| network_error("获取最新构建号失败", e))?;
        if !response.status().is_success() {
            return Err(SchedulerError::TaskExecution(format!(
                "获取最新构建号失败，状态码: {}",
                response.status().as_u16()
            )));
        }
        let body: LastBuildResponse = response
            .json()
            .await
            .map_err(|e| network_error("解析最新构建号失败", e))?;
        Ok(body.last_build.map(|b| b.number).unwrap_or(0))
    }

    /// 优先使用构建状态返回的地址，查询失败时按任务地址拼接
    async fn console_url(&self, server: &BuildServer, job_name: &str, number: i64) -> String {
        match self.build_status(server, job_name, number).await {
            Ok(status) => {
                if let Some(url) = status.console_url() {
                    return url;
                }
            }
            Err(e) => debug!("获取构建地址失败，使用任务地址: job={}, error={}", job_name, e),
        }
        format!("{}/{}/console", Self::job_url(server, job_name), number)
    }
}

#[async_trait]
impl BuildSystem for JenkinsClient {
    async fn trigger(&self, server: &BuildServer, job_name: &str) -> SchedulerResult<TriggeredBuild> {
        let baseline = self.last_build_number(server, job_name).await?;
        let crumb = self.crumb(server).await?;

        let mut request = self
            .http
            .post(format!("{}/build", Self::job_url(server, job_name)))
            .basic_auth(&server.username, Some(&server.token));
        if let Some((field, value)) = &crumb {
            request = request.header(field.as_str(), value.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| network_error("触发Jenkins构建失败", e))?;

        let status = response.status();
        let accepted = matches!(status, StatusCode::OK | StatusCode::CREATED)
            && response.headers().contains_key(reqwest::header::LOCATION);
        if !accepted {
            return Err(SchedulerError::TaskExecution(format!(
                "触发Jenkins构建失败，状态码: {}",
                status.as_u16()
            )));
        }
        info!(
            "Jenkins构建已提交: server_id={}, job={}, baseline={}",
            server.id, job_name, baseline
        );

        let deadline = Instant::now() + self.config.build_start_wait();
        loop {
            tokio::time::sleep(self.config.build_start_poll()).await;
            match self.last_build_number(server, job_name).await {
                Ok(number) if number > baseline => {
                    let log_url = self.console_url(server, job_name, number).await;
                    info!(
                        "Jenkins构建已开始: job={}, build_number={}",
                        job_name, number
                    );
                    return Ok(TriggeredBuild {
                        build_number: number,
                        log_url,
                    });
                }
                Ok(_) => {}
                Err(e) => warn!("查询最新构建号失败: job={}, error={}", job_name, e),
            }
            if Instant::now() >= deadline {
                return Err(SchedulerError::Timeout("等待新构建开始超时".to_string()));
            }
        }
    }

    async fn build_status(
        &self,
        server: &BuildServer,
        job_name: &str,
        build_number: i64,
    ) -> SchedulerResult<BuildStatus> {
        let url = format!(
            "{}/{}/api/json",
            Self::job_url(server, job_name),
            build_number
        );
        let response = self
            .get(server, url)
            .send()
            .await
            .map_err(|e| network_error("获取构建状态失败", e))?;
        if !response.status().is_success() {
            return Err(SchedulerError::TaskExecution(format!(
                "获取构建状态失败，状态码: {}",
                response.status().as_u16()
            )));
        }
        let body: BuildStatusResponse = response
            .json()
            .await
            .map_err(|e| network_error("解析构建状态失败", e))?;
        Ok(BuildStatus {
            building: body.building,
            result: body.result,
            url: body.url,
        })
    }

    async fn wait_for_completion(
        &self,
        server: &BuildServer,
        job_name: &str,
        build_number: i64,
        mut cancel: CancelSignal,
    ) -> SchedulerResult<BuildResult> {
        let deadline = Instant::now() + self.config.monitor_wait();
        loop {
            sleep_or_cancel(self.config.monitor_poll(), &mut cancel).await?;
            match self.build_status(server, job_name, build_number).await {
                Ok(status) if !status.building => {
                    return Ok(BuildResult::from_result(status.result.as_deref()));
                }
                Ok(_) => debug!(
                    "构建进行中: job={}, build_number={}",
                    job_name, build_number
                ),
                Err(e) => warn!(
                    "查询构建状态失败，继续等待: job={}, build_number={}, error={}",
                    job_name, build_number, e
                ),
            }
            if Instant::now() >= deadline {
                return Err(SchedulerError::Timeout("Jenkins任务监控超时".to_string()));
            }
        }
    }

    async fn fetch_log(
        &self,
        server: &BuildServer,
        job_name: &str,
        build_number: i64,
        start: u64,
    ) -> SchedulerResult<LogChunk> {
        let url = format!(
            "{}/{}/logText/progressiveText?start={}",
            Self::job_url(server, job_name),
            build_number,
            start
        );
        let response = self
            .get(server, url)
            .send()
            .await
            .map_err(|e| network_error("获取构建日志失败", e))?;
        if !response.status().is_success() {
            return Err(SchedulerError::TaskExecution(format!(
                "获取构建日志失败，状态码: {}",
                response.status().as_u16()
            )));
        }

        let headers = response.headers();
        let has_more = headers
            .get("X-More-Data")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let text_size = headers
            .get("X-Text-Size")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let log = response
            .text()
            .await
            .map_err(|e| network_error("读取构建日志失败", e))?;
        let text_size = text_size.unwrap_or(start + log.len() as u64);
        Ok(LogChunk {
            log,
            has_more,
            text_size,
        })
    }
}

/// 通过构建系统执行构建类子任务
pub struct JenkinsAdapter {
    builds: Arc<dyn BuildSystem>,
    resolver: Arc<dyn TargetResolver>,
}

impl JenkinsAdapter {
    pub fn new(builds: Arc<dyn BuildSystem>, resolver: Arc<dyn TargetResolver>) -> Self {
        Self { builds, resolver }
    }
}

#[async_trait]
impl ExecutionAdapter for JenkinsAdapter {
    fn name(&self) -> &str {
        "jenkins"
    }

    fn supports(&self, payload: &JobPayload) -> bool {
        matches!(payload, JobPayload::Build { .. })
    }

    async fn execute(&self, job: &Job, cancel: CancelSignal) -> SchedulerResult<ExecutionOutcome> {
        let JobPayload::Build {
            server_id,
            job_name,
        } = &job.payload
        else {
            return Err(SchedulerError::TaskExecution(format!(
                "Jenkins适配器不支持的任务类型: {}",
                job.payload.kind()
            )));
        };

        let server = match self.resolver.resolve_build_server(*server_id).await {
            Ok(server) => server,
            Err(e @ SchedulerError::BuildServerNotFound { .. }) => {
                return Ok(ExecutionOutcome::failed(e.to_string()))
            }
            Err(e) => return Err(e),
        };

        let triggered = match self.builds.trigger(&server, job_name).await {
            Ok(triggered) => triggered,
            Err(SchedulerError::Shutdown) => return Err(SchedulerError::Shutdown),
            Err(e) => {
                warn!(
                    "Jenkins构建启动失败: record_id={}, job={}, error={}",
                    job.record_id, job_name, e
                );
                return Ok(ExecutionOutcome::failed(format!("任务启动失败: {e}")));
            }
        };

        let result = match self
            .builds
            .wait_for_completion(&server, job_name, triggered.build_number, cancel)
            .await
        {
            Ok(result) => result,
            Err(SchedulerError::Shutdown) => return Err(SchedulerError::Shutdown),
            Err(e) => {
                return Ok(ExecutionOutcome::failed(e.to_string())
                    .with_location(triggered.log_url))
            }
        };

        let log = match self
            .builds
            .fetch_log(&server, job_name, triggered.build_number, 0)
            .await
        {
            Ok(chunk) => Some(chunk.log),
            Err(e) => {
                warn!("获取构建日志失败: record_id={}, error={}", job.record_id, e);
                None
            }
        };

        let mut outcome = match result.failure_message() {
            None => ExecutionOutcome::succeeded(log),
            Some(message) => {
                let outcome = ExecutionOutcome::failed(message);
                match log {
                    Some(log) => outcome.with_log(log),
                    None => outcome,
                }
            }
        };
        outcome = outcome.with_location(triggered.log_url);
        info!(
            "Jenkins构建结束: record_id={}, job={}, build_number={}, success={}",
            job.record_id, job_name, triggered.build_number, outcome.success
        );
        Ok(outcome)
    }
}
