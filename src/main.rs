use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Arg, Command};
use serde_json::json;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cronq_dispatcher::{
    CleanupConfig, CleanupService, TaskLockConfig, TaskLockService, TaskRunner, TaskRunnerConfig,
};
use cronq_domain::{
    DefaultExecutorRegistry, ExecutorKind, ExecutorRegistry, MessageQueue, Task, TaskContext,
    TaskExecutor, TaskStore,
};
use cronq_infrastructure::{
    InMemoryMessageQueue, InMemoryQueueConfig, MemoryLockCache, MemoryTaskStore,
};

mod config;

use config::AppConfig;

/// 演示执行器：把任务载荷写进日志后标记成功
struct LogTaskExecutor;

#[async_trait::async_trait]
impl TaskExecutor for LogTaskExecutor {
    fn name(&self) -> &str {
        "log"
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Sequential { handoff: None }
    }

    async fn execute(
        &self,
        task: &Task,
        ctx: &dyn TaskContext,
    ) -> cronq_errors::SchedulerResult<()> {
        info!("执行任务 {:?}: {}", task.id, task.payload);
        ctx.success(task.clone());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("cronq")
        .version("1.0.0")
        .about("分布式定时任务调度系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .default_value("config/cronq.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").expect("has default");
    let log_level = matches.get_one::<String>("log-level").expect("has default");
    let log_format = matches.get_one::<String>("log-format").expect("has default");

    init_logging(log_level, log_format)?;

    info!("启动分布式定时任务调度系统");
    let (config, loaded) =
        AppConfig::load(config_path).with_context(|| format!("加载配置失败: {config_path}"))?;
    if loaded {
        info!("配置文件: {config_path}");
    } else {
        warn!("配置文件 {config_path} 不存在，使用默认配置");
    }

    // 组装嵌入式部署：内存存储 + 内存队列 + 内存锁缓存
    let task_store: Arc<MemoryTaskStore> = Arc::new(MemoryTaskStore::new());
    let message_queue = Arc::new(InMemoryMessageQueue::with_config(InMemoryQueueConfig {
        poll_interval_ms: config.queue.poll_interval_ms,
        poll_batch_limit: config.queue.poll_batch_limit,
    }));
    message_queue.register(&config.scheduler.queue_id).await?;

    let lock_service = Arc::new(TaskLockService::new(
        Arc::new(MemoryLockCache::new()),
        TaskLockConfig {
            ttl_seconds: config.lock.ttl_seconds,
            key_prefix: config.lock.key_prefix.clone(),
        },
    ));

    let registry = Arc::new(DefaultExecutorRegistry::new());
    registry
        .register(&config.scheduler.queue_id, "log", Arc::new(LogTaskExecutor))
        .await?;

    let runner = TaskRunner::new(
        task_store.clone(),
        registry,
        lock_service,
        message_queue.clone(),
        None,
        TaskRunnerConfig {
            capacity_reschedule_seconds: config.scheduler.capacity_reschedule_seconds,
        },
    );

    let mut cleanup = CleanupService::new(
        task_store.clone(),
        CleanupConfig {
            cleanup_interval_seconds: config.cleanup.cleanup_interval_seconds,
            stale_processing_hours: config.cleanup.stale_processing_hours,
            enabled: config.cleanup.enabled,
        },
    );
    cleanup.start().await?;

    seed_demo_tasks(task_store.as_ref(), &config.scheduler.queue_id).await?;

    let mut tick = tokio::time::interval(Duration::from_millis(config.scheduler.tick_interval_ms));
    info!(
        "调度循环启动，tick 间隔 {}ms",
        config.scheduler.tick_interval_ms
    );
    loop {
        tokio::select! {
            _ = tick.tick() => {
                match runner.run_once().await {
                    Ok(results) => {
                        if !results.is_empty() {
                            info!(
                                "本轮结果: 成功 {} 失败 {} 忽略 {}",
                                results.success_tasks.len(),
                                results.failed_tasks.len(),
                                results.ignored_tasks.len()
                            );
                        }
                    }
                    Err(e) => error!("调度 tick 失败: {}", e),
                }
            }
            _ = signal::ctrl_c() => {
                info!("收到退出信号，开始关闭");
                break;
            }
        }
    }

    cleanup.stop().await?;
    message_queue.shutdown().await?;
    info!("调度器已退出");
    Ok(())
}

/// 预置两个演示任务，让空存储上也能看到调度过程
async fn seed_demo_tasks(task_store: &MemoryTaskStore, queue_id: &str) -> Result<()> {
    let now = Utc::now();
    let tasks = vec![
        Task::new(queue_id, "log", json!({"message": "hello"}), now),
        Task::new(
            queue_id,
            "log",
            json!({"message": "delayed hello"}),
            now + chrono::Duration::seconds(5),
        ),
    ];
    task_store.create_tasks(&tasks).await?;
    info!("已预置 {} 个演示任务", tasks.len());
    Ok(())
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    match format {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}
