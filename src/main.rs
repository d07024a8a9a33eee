use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use devops_scheduler::app::Application;
use devops_scheduler::shutdown::{wait_for_signal, ShutdownManager};
use scheduler_config::{AppConfig, LogFormat, LogLevel};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "devops-scheduler", version, about = "运维任务编排引擎")]
struct Cli {
    /// 配置文件路径，不指定时按默认路径查找
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 覆盖配置中的日志级别
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    /// 覆盖配置中的日志格式
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            cli.config.as_deref().unwrap_or("<默认路径>")
        )
    })?;

    let level = cli.log_level.unwrap_or(config.logging.level);
    let format = cli.log_format.unwrap_or(config.logging.format);
    init_logging(level, format)?;

    info!("启动运维任务编排引擎");
    let app = Arc::new(Application::new(config).await?);

    let shutdown = ShutdownManager::new();
    let app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {:#}", e);
            }
        })
    };

    wait_for_signal().await;
    info!("开始优雅关闭");
    shutdown.shutdown();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {}", e),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }
    Ok(())
}

fn init_logging(level: LogLevel, format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
    }
    Ok(())
}
