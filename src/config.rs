use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// 应用配置
///
/// 从 toml 文件加载；缺失的段与字段都回落到默认值。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerSection,
    pub queue: QueueSection,
    pub lock: LockSection,
    pub cleanup: CleanupSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// 调度 tick 间隔（毫秒）
    pub tick_interval_ms: u64,
    /// 异步容量不足时的整组重排延迟（秒）
    pub capacity_reschedule_seconds: i64,
    /// 演示执行器挂载的队列
    pub queue_id: String,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            capacity_reschedule_seconds: 180,
            queue_id: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub poll_interval_ms: u64,
    pub poll_batch_limit: usize,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            poll_batch_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockSection {
    pub ttl_seconds: u64,
    pub key_prefix: String,
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            ttl_seconds: 60,
            key_prefix: "task-lock".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupSection {
    pub cleanup_interval_seconds: u64,
    pub stale_processing_hours: i64,
    pub enabled: bool,
}

impl Default for CleanupSection {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: 3600,
            stale_processing_hours: 48,
            enabled: true,
        }
    }
}

impl AppConfig {
    /// 加载配置文件；文件不存在时使用内置默认值
    pub fn load(path: &str) -> Result<(Self, bool)> {
        if !Path::new(path).exists() {
            return Ok((Self::default(), false));
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {path}"))?;
        let config =
            toml::from_str(&raw).with_context(|| format!("解析配置文件失败: {path}"))?;
        Ok((config, true))
    }
}
