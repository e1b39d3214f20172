use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use cronq_domain::{CleanupReport, TaskStore};
use cronq_errors::SchedulerResult;

/// 清理配置
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// 清理间隔（秒）
    pub cleanup_interval_seconds: u64,
    /// processing 状态的陈旧窗口（小时），超过视为孤儿
    pub stale_processing_hours: i64,
    /// 是否启用自动清理
    pub enabled: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: 3600,
            stale_processing_hours: 48,
            enabled: true,
        }
    }
}

/// 陈旧任务清理服务
///
/// 周期性地把超过陈旧窗口的孤儿 processing 任务重置回 Scheduled
/// （retries 加一的隐式重试），并移除超过 `expires_at` 的过期任务。
/// 执行器抛错却没有调用 fail 的任务最终由这条路径兜底重排。
pub struct CleanupService {
    task_store: Arc<dyn TaskStore>,
    config: CleanupConfig,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    cleanup_handle: Option<tokio::task::JoinHandle<()>>,
}

impl CleanupService {
    pub fn new(task_store: Arc<dyn TaskStore>, config: CleanupConfig) -> Self {
        Self {
            task_store,
            config,
            shutdown_tx: None,
            cleanup_handle: None,
        }
    }

    /// 启动清理循环
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if !self.config.enabled {
            info!("清理服务未启用");
            return Ok(());
        }

        info!("启动清理服务: {:?}", self.config);

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let task_store = self.task_store.clone();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let mut cleanup_interval =
                interval(std::time::Duration::from_secs(config.cleanup_interval_seconds));

            loop {
                tokio::select! {
                    _ = cleanup_interval.tick() => {
                        if let Err(e) = Self::perform_cleanup(&task_store, &config).await {
                            error!("清理失败: {}", e);
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("清理服务收到停止请求");
                        break;
                    }
                }
            }

            info!("清理服务已停止");
        });

        self.cleanup_handle = Some(handle);
        Ok(())
    }

    /// 停止清理循环
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.cleanup_handle.take() {
            if let Err(e) = handle.await {
                warn!("等待清理服务停止时出错: {}", e);
            }
        }

        Ok(())
    }

    /// 立即执行一次清理
    pub async fn run_once(&self) -> SchedulerResult<CleanupReport> {
        Self::perform_cleanup(&self.task_store, &self.config).await
    }

    async fn perform_cleanup(
        task_store: &Arc<dyn TaskStore>,
        config: &CleanupConfig,
    ) -> SchedulerResult<CleanupReport> {
        let stats = task_store.get_cleanup_stats().await?;
        debug!(
            "清理前存量: scheduled={} processing={} orphaned={} expired={}",
            stats.scheduled, stats.processing, stats.orphaned_processing, stats.expired
        );

        let now = Utc::now();
        let orphaned_before = now - Duration::hours(config.stale_processing_hours);
        let report = task_store.cleanup_tasks(orphaned_before, now).await?;

        if report.requeued > 0 || report.removed > 0 {
            info!(
                "清理完成: 重新入队 {} 个孤儿任务，移除 {} 个过期任务",
                report.requeued, report.removed
            );
        }
        Ok(report)
    }
}
