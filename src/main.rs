use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use scrape_core::{init_logging, AppConfig, LogFormat, ScraperRegistry};
use scrape_scheduler::{
    scrapers::builtin_scrapers,
    shutdown::{wait_for_signal, ShutdownManager},
    Application, RunMode,
};

/// 抓取任务分布式执行引擎
#[derive(Debug, Parser)]
#[command(name = "scrape-scheduler", version, about)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 运行模式
    #[arg(short, long, value_enum, default_value_t = RunMode::Local)]
    mode: RunMode,

    /// 日志级别，RUST_LOG 优先
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 日志格式: json | pretty
    #[arg(long, default_value = "pretty")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_format: LogFormat = cli.log_format.parse()?;
    init_logging(&cli.log_level, log_format)?;

    info!("启动抓取调度器，模式: {}", cli.mode.as_str());

    let config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;

    let registry = ScraperRegistry::new();
    registry.register_batch(builtin_scrapers()).await;

    let app = Application::new(config, cli.mode, registry)
        .await
        .context("初始化应用程序失败")?;

    let shutdown = ShutdownManager::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("开始优雅关闭...");
        signal_shutdown.shutdown();
    });

    app.run(shutdown).await?;

    info!("调度器已关闭");
    Ok(())
}
