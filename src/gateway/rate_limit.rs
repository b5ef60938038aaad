use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use super::MessageKind;
use crate::config::Config;
use crate::error::AppError;

/// 单连接固定窗口限流，按消息类型分别计数：位置上报的
/// 配额高于邻近查询。状态只属于本连接，不需要跨连接协调。
pub struct ConnectionRateLimiter {
    window: Duration,
    limits: HashMap<MessageKind, u32>,
    counters: Mutex<HashMap<MessageKind, (Instant, u32)>>,
}

impl ConnectionRateLimiter {
    pub fn new(window: Duration, limits: HashMap<MessageKind, u32>) -> Self {
        Self {
            window,
            limits,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut limits = HashMap::new();
        limits.insert(
            MessageKind::UpdateLocation,
            config.location_updates_per_window,
        );
        limits.insert(
            MessageKind::UpdateViewport,
            config.viewport_queries_per_window,
        );
        Self::new(config.ws_rate_window(), limits)
    }

    pub fn check(&self, kind: MessageKind) -> Result<(), AppError> {
        let limit = self.limits.get(&kind).copied().unwrap_or(u32::MAX);
        let now = Instant::now();
        let mut counters = self.counters.lock().unwrap();
        let entry = counters.entry(kind).or_insert((now, 0));

        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        entry.1 += 1;

        if entry.1 > limit {
            return Err(AppError::RateLimited);
        }
        Ok(())
    }
}
