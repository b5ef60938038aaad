use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;
use crate::store::{PresenceStore, StoreError};

/// 连接↔实体在线状态。TTL 是存活兜底：断连通知丢失时，
/// 记录在不活跃超时后自行消失。
pub struct PresenceService {
    store: Arc<dyn PresenceStore>,
    ttl: Duration,
    register_timeout: Duration,
}

impl PresenceService {
    pub fn new(store: Arc<dyn PresenceStore>, ttl: Duration, register_timeout: Duration) -> Self {
        Self {
            store,
            ttl,
            register_timeout,
        }
    }

    fn context(connection_id: &str, entity_id: &str) -> String {
        format!("connection={} entity={}", connection_id, entity_id)
    }

    /// 注册失败必须让连接建立失败，不允许客户端挂在一个
    /// 没有订阅的连接上
    pub async fn register(&self, connection_id: &str, entity_id: &str) -> Result<(), AppError> {
        match tokio::time::timeout(
            self.register_timeout,
            self.store.register(connection_id, entity_id, self.ttl),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(AppError::store(
                "presence.register",
                Self::context(connection_id, entity_id),
                e,
            )),
            Err(_) => Err(AppError::store(
                "presence.register",
                Self::context(connection_id, entity_id),
                StoreError::Timeout,
            )),
        }
    }

    /// 每条入站消息都会经过这里：查实体并刷新两个方向的 TTL，
    /// 没有独立的心跳消息类型
    pub async fn touch(&self, connection_id: &str) -> Result<Option<String>, AppError> {
        self.store
            .touch(connection_id, self.ttl)
            .await
            .map_err(|e| AppError::store("presence.touch", format!("connection={connection_id}"), e))
    }

    pub async fn resolve(&self, connection_id: &str) -> Result<String, AppError> {
        self.store
            .resolve(connection_id)
            .await
            .map_err(|e| {
                AppError::store("presence.resolve", format!("connection={connection_id}"), e)
            })?
            .ok_or_else(|| AppError::NotFound(format!("connection={connection_id}")))
    }

    pub async fn unregister(&self, connection_id: &str, entity_id: &str) -> Result<(), AppError> {
        self.store
            .unregister(connection_id, entity_id)
            .await
            .map_err(|e| {
                AppError::store(
                    "presence.unregister",
                    Self::context(connection_id, entity_id),
                    e,
                )
            })
    }
}
