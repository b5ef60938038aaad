use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::geo::GeoPoint;

pub mod redis;

#[cfg(test)]
pub mod memory;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("存储后端命令失败: {0}")]
    Backend(String),
    #[error("存储操作超时")]
    Timeout,
    #[error("存储响应格式异常: {0}")]
    Malformed(String),
    #[error("存储暂不可用: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoEntry {
    pub entity_id: String,
    pub point: GeoPoint,
    pub distance_meters: f64,
}

/// 按实体ID存一条当前位置的地理索引，距离由存储端以
/// 大圆距离计算返回。
#[async_trait]
pub trait GeoStore: Send + Sync {
    async fn geo_add(&self, index: &str, entity_id: &str, point: GeoPoint)
    -> Result<(), StoreError>;

    /// 返回 center 半径 radius_meters 内的全部实体，按距离升序
    async fn geo_search(
        &self,
        index: &str,
        center: GeoPoint,
        radius_meters: f64,
    ) -> Result<Vec<GeoEntry>, StoreError>;

    async fn geo_remove(&self, index: &str, entity_id: &str) -> Result<(), StoreError>;

    async fn geo_position(
        &self,
        index: &str,
        entity_id: &str,
    ) -> Result<Option<GeoPoint>, StoreError>;
}

/// 连接↔实体双向映射，TTL 到期即视为掉线
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// 两个方向必须在一次原子多键写入中建立
    async fn register(
        &self,
        connection_id: &str,
        entity_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// 查连接对应实体并顺带刷新两个方向的 TTL（存活心跳）
    async fn touch(&self, connection_id: &str, ttl: Duration)
    -> Result<Option<String>, StoreError>;

    async fn resolve(&self, connection_id: &str) -> Result<Option<String>, StoreError>;

    /// 幂等：已过期也可安全调用
    async fn unregister(&self, connection_id: &str, entity_id: &str) -> Result<(), StoreError>;
}

/// 消费者 → 已订阅商家房间集合。每次写入刷新整个集合的
/// TTL：断连清理丢失时残留记录随 TTL 自行消失。
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn rooms_of(&self, consumer_id: &str) -> Result<HashSet<String>, StoreError>;

    async fn add_room(
        &self,
        consumer_id: &str,
        vendor_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn remove_room(
        &self,
        consumer_id: &str,
        vendor_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn clear_rooms(&self, consumer_id: &str) -> Result<(), StoreError>;
}
