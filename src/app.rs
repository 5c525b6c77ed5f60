use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use clap::ValueEnum;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use scrape_api::{create_app, AppState};
use scrape_core::{
    config::AppConfig,
    models::ScraperType,
    traits::{ClusterCallbackHandler, TaskRepository, WorkerTaskReceiver},
    ScraperRegistry,
};
use scrape_dispatcher::{
    wait_for_replicas, Aggregator, CapacityTracker, LeastLoadedStrategy, MasterExecutor,
    StartupRecovery, StaticNodeDiscovery, SyncWaitOptions, TaskExecutor, TaskFinalizer,
    TaskService,
};
use scrape_infrastructure::{
    DatabaseManager, ResultCache, ResultStore, RetryingTaskRepository, SqliteTaskRepository,
};
use scrape_worker::{resolve_node_name, MasterClient, WorkerExecutor};

use crate::shutdown::ShutdownManager;

/// 轮询循环退出的最长等待时间
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// 运行角色，启动时选定一次
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// 单进程：本地轮询并在本机线程上执行
    Local,
    /// 集群主节点：轮询并派发给 Worker
    Master,
    /// 集群工作节点：只执行 Master 派发的任务
    Worker,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Local => "local",
            RunMode::Master => "master",
            RunMode::Worker => "worker",
        }
    }
}

/// 按角色选定的执行器
pub enum Scheduler {
    Local(Arc<TaskExecutor>),
    Master(Arc<MasterExecutor>),
    Worker(Arc<WorkerExecutor>),
}

/// 任务表、结果存储与任务服务，单进程和 Master 共用
struct TaskStack {
    database: DatabaseManager,
    repo: Arc<dyn TaskRepository>,
    finalizer: Arc<TaskFinalizer>,
    service: Arc<TaskService>,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: RunMode,
    scheduler: Scheduler,
    state: AppState,
    database: Option<DatabaseManager>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: RunMode, registry: ScraperRegistry) -> Result<Self> {
        info!(
            "初始化应用程序，模式: {}，已注册抓取器: {:?}",
            mode.as_str(),
            registry.list_scrapers().await
        );

        match mode {
            RunMode::Local => Self::new_local(config, registry).await,
            RunMode::Master => Self::new_master(config, registry).await,
            RunMode::Worker => Self::new_worker(config, registry),
        }
    }

    async fn new_local(config: AppConfig, registry: ScraperRegistry) -> Result<Self> {
        let stack = build_task_stack(&config, &registry).await?;

        let capacity = Arc::new(CapacityTracker::new(config.executor.rate_limits.clone()));
        let executor = Arc::new(TaskExecutor::new(
            stack.repo.clone(),
            registry,
            capacity,
            stack.finalizer.clone(),
            Duration::from_millis(config.executor.poll_interval_ms),
        ));

        let state = AppState {
            mode: RunMode::Local.as_str(),
            node_name: config.cluster.node_name.clone(),
            task_service: Some(stack.service),
            callbacks: None,
            worker: None,
        };

        Ok(Self {
            config,
            mode: RunMode::Local,
            scheduler: Scheduler::Local(executor),
            state,
            database: Some(stack.database),
        })
    }

    async fn new_master(config: AppConfig, registry: ScraperRegistry) -> Result<Self> {
        config.cluster.validate_master().context("Master配置验证失败")?;
        let cluster = &config.cluster;

        let discovery = StaticNodeDiscovery::new(
            &cluster.nodes,
            Duration::from_secs(cluster.dispatch_timeout_seconds),
        )
        .context("创建节点发现失败")?;
        let nodes = wait_for_replicas(
            &discovery,
            cluster.expected_replicas,
            Duration::from_secs(cluster.readiness_timeout_seconds),
            Duration::from_millis(cluster.readiness_poll_ms),
        )
        .await
        .context("等待Worker节点就绪失败")?;

        let stack = build_task_stack(&config, &registry).await?;
        let master = Arc::new(
            MasterExecutor::new(
                stack.repo.clone(),
                stack.finalizer.clone(),
                nodes,
                &config.executor.rate_limits,
                Box::new(LeastLoadedStrategy::new()),
                Duration::from_secs(cluster.dispatch_timeout_seconds),
                Duration::from_millis(config.executor.poll_interval_ms),
            )
            .context("创建Master执行器失败")?,
        );

        let callbacks: Arc<dyn ClusterCallbackHandler> = master.clone();
        let state = AppState {
            mode: RunMode::Master.as_str(),
            node_name: cluster.node_name.clone(),
            task_service: Some(stack.service),
            callbacks: Some(callbacks),
            worker: None,
        };

        Ok(Self {
            config,
            mode: RunMode::Master,
            scheduler: Scheduler::Master(master),
            state,
            database: Some(stack.database),
        })
    }

    fn new_worker(config: AppConfig, registry: ScraperRegistry) -> Result<Self> {
        config.cluster.validate_worker().context("Worker配置验证失败")?;
        let cluster = &config.cluster;

        let master_url = cluster.master_url.clone().unwrap_or_default();
        let client = MasterClient::new(
            &master_url,
            Duration::from_secs(cluster.callback_timeout_seconds),
            cluster.callback_retry.policy(),
        )
        .context("创建Master客户端失败")?;

        let executor = Arc::new(WorkerExecutor::new(
            resolve_node_name(&cluster.node_name),
            registry,
            Arc::new(client),
        ));
        info!("Worker节点 {} 将向 {} 回报结果", executor.node_name(), master_url);

        let receiver: Arc<dyn WorkerTaskReceiver> = executor.clone();
        let state = AppState {
            mode: RunMode::Worker.as_str(),
            node_name: executor.node_name().to_string(),
            task_service: None,
            callbacks: None,
            worker: Some(receiver),
        };

        Ok(Self {
            config,
            mode: RunMode::Worker,
            scheduler: Scheduler::Worker(executor),
            state,
            database: None,
        })
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn router(&self) -> Router {
        create_app(self.state.clone(), &self.config.api)
    }

    /// 绑定配置中的地址并运行到收到关闭信号
    pub async fn run(self, shutdown: ShutdownManager) -> Result<()> {
        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址 {} 失败", self.config.api.bind_address))?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownManager) -> Result<()> {
        let addr = listener.local_addr().context("读取监听地址失败")?;
        let app = self.router();
        let poll_handles = self.start_polling(&shutdown);
        info!("{} 模式HTTP服务监听于 {}", self.mode.as_str(), addr);

        let mut shutdown_rx = shutdown.subscribe();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .context("HTTP服务异常退出");

        // 服务异常退出时也要停掉轮询
        shutdown.shutdown();
        if tokio::time::timeout(DRAIN_TIMEOUT, join_poll_loops(poll_handles))
            .await
            .is_err()
        {
            warn!("等待轮询循环退出超时");
        }

        if let Some(database) = &self.database {
            database.close().await;
        }

        info!("应用程序已停止");
        served
    }

    fn start_polling(&self, shutdown: &ShutdownManager) -> Vec<JoinHandle<()>> {
        match &self.scheduler {
            Scheduler::Local(executor) => executor.start(&ScraperType::ALL, shutdown.sender()),
            Scheduler::Master(master) => master.start(&ScraperType::ALL, shutdown.sender()),
            Scheduler::Worker(_) => Vec::new(),
        }
    }
}

async fn join_poll_loops(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("轮询循环异常结束: {}", e);
        }
    }
}

/// 打开数据库，组装存储与任务服务，并完成启动对账
async fn build_task_stack(config: &AppConfig, registry: &ScraperRegistry) -> Result<TaskStack> {
    let database = DatabaseManager::new(&config.database)
        .await
        .context("初始化数据库失败")?;

    let sqlite: Arc<dyn TaskRepository> =
        Arc::new(SqliteTaskRepository::new(database.pool().clone()));
    let repo: Arc<dyn TaskRepository> = Arc::new(RetryingTaskRepository::new(
        sqlite,
        config.database.retry_policy(),
        config.database.fatal_on_exhaustion,
    ));

    let results = Arc::new(ResultStore::new(config.storage.results_dir()));
    let cache = Arc::new(ResultCache::new(config.storage.cache_dir()));

    let aggregator = Arc::new(Aggregator::new(repo.clone(), results.clone(), registry.clone()));
    let finalizer = Arc::new(TaskFinalizer::new(
        repo.clone(),
        results.clone(),
        cache.clone(),
        registry.clone(),
        aggregator.clone(),
    ));

    let executor = &config.executor;
    let sync_wait = SyncWaitOptions {
        poll_interval: Duration::from_millis(executor.sync_poll_interval_ms),
        timeout: (executor.sync_wait_timeout_seconds > 0)
            .then(|| Duration::from_secs(executor.sync_wait_timeout_seconds)),
    };
    let service = Arc::new(TaskService::new(
        repo.clone(),
        results.clone(),
        cache,
        registry.clone(),
        aggregator,
        sync_wait,
    ));

    StartupRecovery::new(repo.clone(), results)
        .recover()
        .await
        .context("启动对账失败")?;

    Ok(TaskStack {
        database,
        repo,
        finalizer,
        service,
    })
}
