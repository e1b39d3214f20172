use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// AIMD 自适应策略配置
///
/// 加性增长、乘性收缩，外加超过失败阈值后的指数退避窗口。
#[derive(Debug, Clone)]
pub struct AdaptiveShardConfig {
    /// 新分片的初始批量
    pub initial_batch_size: usize,
    /// 加性增长步长
    pub batch_increase_step: usize,
    /// 触发一次增长所需的连续成功次数
    pub success_threshold: u32,
    pub max_batch_size: usize,
    /// 乘性收缩因子
    pub decrease_factor: f64,
    pub min_batch_size: usize,
    /// 基础轮询间隔（毫秒）
    pub base_delay_ms: u64,
    pub delay_increase_factor: f64,
    pub max_delay_ms: u64,
    /// 进入指数退避所需的连续失败次数
    pub failure_backoff_threshold: u32,
    pub max_backoff_ms: u64,
    /// 按类型统计的滚动窗口大小
    pub type_window_size: usize,
    /// 热点类型的失败率阈值
    pub hot_failure_rate: f64,
}

impl Default for AdaptiveShardConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: 10,
            batch_increase_step: 10,
            success_threshold: 3,
            max_batch_size: 500,
            decrease_factor: 0.5,
            min_batch_size: 10,
            base_delay_ms: 1000,
            delay_increase_factor: 1.5,
            max_delay_ms: 30_000,
            failure_backoff_threshold: 10,
            max_backoff_ms: 60_000,
            type_window_size: 100,
            hot_failure_rate: 0.5,
        }
    }
}

/// 单个分片的调优状态
#[derive(Debug, Clone)]
pub struct ShardState {
    pub batch_size: usize,
    pub delay_ms: u64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub backoff_until: Option<DateTime<Utc>>,
}

/// 单次批处理的观测结果
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub failure_count: usize,
    pub throttled: bool,
    pub poison_pill: bool,
    /// 本批每个任务的类型，一个任务一条
    pub task_types: Vec<String>,
    /// 本批每个失败任务的类型，一个失败任务一条
    pub failed_task_types: Vec<String>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.failure_count == 0 && !self.throttled && !self.poison_pill
    }
}

#[derive(Default)]
struct StrategyState {
    shards: HashMap<String, ShardState>,
    type_window: VecDeque<(String, bool)>,
}

/// 分片消费的 AIMD 控制器
///
/// 只持有调优状态，不持有消息。全部可变状态收拢在自身的 Mutex
/// 边界内，外部只能通过方法喂入观测与读取快照。
pub struct AdaptiveShardStrategy {
    config: AdaptiveShardConfig,
    state: Mutex<StrategyState>,
}

impl AdaptiveShardStrategy {
    pub fn new() -> Self {
        Self::with_config(AdaptiveShardConfig::default())
    }

    pub fn with_config(config: AdaptiveShardConfig) -> Self {
        Self {
            config,
            state: Mutex::new(StrategyState::default()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, StrategyState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fresh_shard(&self) -> ShardState {
        ShardState {
            batch_size: self.config.initial_batch_size,
            delay_ms: self.config.base_delay_ms,
            consecutive_successes: 0,
            consecutive_failures: 0,
            backoff_until: None,
        }
    }

    /// 喂入一次批处理结果，推进对应分片的调优状态
    pub fn record_batch_result(&self, shard_id: &str, result: &BatchResult) {
        let mut state = self.guard();

        // 滚动窗口记录 (类型, 是否成功)，跨分片共享
        let mut remaining_failed: HashMap<&str, usize> = HashMap::new();
        for task_type in &result.failed_task_types {
            *remaining_failed.entry(task_type.as_str()).or_default() += 1;
        }
        for task_type in &result.task_types {
            let succeeded = match remaining_failed.get_mut(task_type.as_str()) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    false
                }
                _ => true,
            };
            state.type_window.push_back((task_type.clone(), succeeded));
        }
        while state.type_window.len() > self.config.type_window_size {
            state.type_window.pop_front();
        }

        let fresh = self.fresh_shard();
        let shard = state
            .shards
            .entry(shard_id.to_string())
            .or_insert_with(|| fresh);

        if result.is_success() {
            shard.consecutive_failures = 0;
            shard.consecutive_successes += 1;
            shard.delay_ms = self.config.base_delay_ms;
            shard.backoff_until = None;
            if shard.consecutive_successes >= self.config.success_threshold {
                let grown = (shard.batch_size + self.config.batch_increase_step)
                    .min(self.config.max_batch_size);
                if grown != shard.batch_size {
                    debug!("分片 {} 批量加性增长: {} -> {}", shard_id, shard.batch_size, grown);
                }
                shard.batch_size = grown;
                shard.consecutive_successes = 0;
            }
        } else {
            shard.consecutive_successes = 0;
            shard.consecutive_failures += 1;
            let shrunk = ((shard.batch_size as f64 * self.config.decrease_factor) as usize)
                .max(self.config.min_batch_size);
            if shrunk != shard.batch_size {
                debug!("分片 {} 批量乘性收缩: {} -> {}", shard_id, shard.batch_size, shrunk);
            }
            shard.batch_size = shrunk;
            shard.delay_ms = ((shard.delay_ms as f64 * self.config.delay_increase_factor) as u64)
                .min(self.config.max_delay_ms);

            if shard.consecutive_failures >= self.config.failure_backoff_threshold {
                let exp = shard.consecutive_failures - self.config.failure_backoff_threshold;
                let backoff_ms = 1000u64
                    .saturating_mul(1u64 << exp.min(20))
                    .min(self.config.max_backoff_ms);
                shard.backoff_until =
                    Some(Utc::now() + chrono::Duration::milliseconds(backoff_ms as i64));
                info!(
                    "分片 {} 连续失败 {} 次，退避 {}ms",
                    shard_id, shard.consecutive_failures, backoff_ms
                );
            }
        }
    }

    /// 当前建议的拉取批量
    pub fn batch_size(&self, shard_id: &str) -> usize {
        let state = self.guard();
        state
            .shards
            .get(shard_id)
            .map(|shard| shard.batch_size)
            .unwrap_or(self.config.initial_batch_size)
    }

    /// 当前建议的轮询间隔
    pub fn poll_delay(&self, shard_id: &str) -> Duration {
        let state = self.guard();
        let delay_ms = state
            .shards
            .get(shard_id)
            .map(|shard| shard.delay_ms)
            .unwrap_or(self.config.base_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// 分片是否处于退避窗口内
    ///
    /// 窗口过去后自清除并返回 false。
    pub fn should_backoff(&self, shard_id: &str) -> bool {
        let mut state = self.guard();
        let Some(shard) = state.shards.get_mut(shard_id) else {
            return false;
        };
        match shard.backoff_until {
            Some(until) if Utc::now() < until => true,
            Some(_) => {
                shard.backoff_until = None;
                false
            }
            None => false,
        }
    }

    /// 滚动窗口内失败率超过阈值的任务类型
    pub fn hot_task_types(&self) -> Vec<String> {
        let state = self.guard();
        let mut totals: HashMap<&str, (usize, usize)> = HashMap::new();
        for (task_type, succeeded) in &state.type_window {
            let entry = totals.entry(task_type.as_str()).or_default();
            entry.0 += 1;
            if !succeeded {
                entry.1 += 1;
            }
        }
        let mut hot: Vec<String> = totals
            .into_iter()
            .filter(|(_, (total, failed))| {
                *total > 0 && (*failed as f64 / *total as f64) > self.config.hot_failure_rate
            })
            .map(|(task_type, _)| task_type.to_string())
            .collect();
        hot.sort();
        hot
    }

    /// 读取调优状态快照，不产生任何副作用
    pub fn get_snapshot(&self, shard_id: Option<&str>) -> StrategySnapshot {
        match shard_id {
            Some(id) => {
                let state = self.guard();
                let shard = state.shards.get(id).cloned().unwrap_or_else(|| self.fresh_shard());
                StrategySnapshot::Shard(ShardSnapshot {
                    shard_id: id.to_string(),
                    batch_size: shard.batch_size,
                    delay_ms: shard.delay_ms,
                    consecutive_successes: shard.consecutive_successes,
                    consecutive_failures: shard.consecutive_failures,
                    backoff_until: shard.backoff_until,
                })
            }
            None => {
                let hot_task_types = self.hot_task_types();
                let state = self.guard();
                let shard_count = state.shards.len();
                let mut aggregate = AggregateSnapshot {
                    shard_count,
                    hot_task_types,
                    ..AggregateSnapshot::default()
                };
                for shard in state.shards.values() {
                    aggregate.avg_batch_size += shard.batch_size as f64;
                    aggregate.avg_delay_ms += shard.delay_ms as f64;
                    aggregate.total_consecutive_successes += shard.consecutive_successes as u64;
                    aggregate.total_consecutive_failures += shard.consecutive_failures as u64;
                    if let Some(until) = shard.backoff_until {
                        aggregate.latest_backoff_until = Some(
                            aggregate
                                .latest_backoff_until
                                .map_or(until, |latest| latest.max(until)),
                        );
                    }
                }
                if shard_count > 0 {
                    aggregate.avg_batch_size /= shard_count as f64;
                    aggregate.avg_delay_ms /= shard_count as f64;
                }
                StrategySnapshot::Aggregate(aggregate)
            }
        }
    }
}

impl Default for AdaptiveShardStrategy {
    fn default() -> Self {
        Self::new()
    }
}

/// 单分片或聚合视角的只读快照
#[derive(Debug, Clone)]
pub enum StrategySnapshot {
    Shard(ShardSnapshot),
    Aggregate(AggregateSnapshot),
}

#[derive(Debug, Clone)]
pub struct ShardSnapshot {
    pub shard_id: String,
    pub batch_size: usize,
    pub delay_ms: u64,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub backoff_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateSnapshot {
    pub shard_count: usize,
    pub avg_batch_size: f64,
    pub avg_delay_ms: f64,
    pub total_consecutive_successes: u64,
    pub total_consecutive_failures: u64,
    pub latest_backoff_until: Option<DateTime<Utc>>,
    pub hot_task_types: Vec<String>,
}
