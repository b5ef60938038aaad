use std::sync::Arc;

use async_trait::async_trait;

use super::InboundFrame;
use super::rate_limit::ConnectionRateLimiter;
use crate::error::AppError;
use crate::presence::PresenceService;

pub struct MessageCtx<F> {
    pub connection_id: String,
    pub frame: F,
    /// 鉴权守卫通过后填入
    pub entity_id: Option<String>,
}

impl<F> MessageCtx<F> {
    pub fn new(connection_id: &str, frame: F) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            frame,
            entity_id: None,
        }
    }
}

#[async_trait]
pub trait Guard<F: InboundFrame + Send + Sync>: Send + Sync {
    async fn check(&self, ctx: &mut MessageCtx<F>) -> Result<(), AppError>;
}

/// 入站消息的守卫流水线：显式有序列表，逐个执行，第一个
/// 失败的守卫决定返回的错误。
pub struct Pipeline<F: InboundFrame + Send + Sync> {
    guards: Vec<Box<dyn Guard<F>>>,
}

impl<F: InboundFrame + Send + Sync> Pipeline<F> {
    pub fn new() -> Self {
        Self { guards: Vec::new() }
    }

    pub fn with(mut self, guard: Box<dyn Guard<F>>) -> Self {
        self.guards.push(guard);
        self
    }

    pub async fn run(&self, ctx: &mut MessageCtx<F>) -> Result<(), AppError> {
        for guard in &self.guards {
            guard.check(ctx).await?;
        }
        Ok(())
    }
}

impl<F: InboundFrame + Send + Sync> Default for Pipeline<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// 连接必须在线；查找顺带刷新 TTL，兼作存活心跳
pub struct AuthGuard {
    presence: Arc<PresenceService>,
}

impl AuthGuard {
    pub fn new(presence: Arc<PresenceService>) -> Self {
        Self { presence }
    }
}

#[async_trait]
impl<F: InboundFrame + Send + Sync> Guard<F> for AuthGuard {
    async fn check(&self, ctx: &mut MessageCtx<F>) -> Result<(), AppError> {
        match self.presence.touch(&ctx.connection_id).await? {
            Some(entity_id) => {
                ctx.entity_id = Some(entity_id);
                Ok(())
            }
            None => Err(AppError::Unauthorized),
        }
    }
}

pub struct RateLimitGuard {
    limiter: Arc<ConnectionRateLimiter>,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<ConnectionRateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl<F: InboundFrame + Send + Sync> Guard<F> for RateLimitGuard {
    async fn check(&self, ctx: &mut MessageCtx<F>) -> Result<(), AppError> {
        self.limiter.check(ctx.frame.kind())
    }
}

pub struct SchemaGuard;

#[async_trait]
impl<F: InboundFrame + Send + Sync> Guard<F> for SchemaGuard {
    async fn check(&self, ctx: &mut MessageCtx<F>) -> Result<(), AppError> {
        ctx.frame.validate()
    }
}

/// 固定顺序：鉴权 → 限流 → 模式校验
pub fn standard_pipeline<F: InboundFrame + Send + Sync + 'static>(
    presence: Arc<PresenceService>,
    limiter: Arc<ConnectionRateLimiter>,
) -> Pipeline<F> {
    Pipeline::new()
        .with(Box::new(AuthGuard::new(presence)))
        .with(Box::new(RateLimitGuard::new(limiter)))
        .with(Box::new(SchemaGuard))
}
