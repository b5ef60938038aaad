use async_nats::jetstream;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

pub mod worker;

// 总线主题（location.* 命名空间）
pub const SUBJECT_UPDATE_REQUESTED: &str = "location.vendor.location_update_requested";
pub const SUBJECT_LOCATION_UPDATED: &str = "location.vendor.location_updated";
pub const SUBJECT_ENTERED_AREA: &str = "location.user.entered_vendor_area";
pub const SUBJECT_LEFT_AREA: &str = "location.user.left_vendor_area";
pub const SUBJECT_VENDOR_STATUS: &str = "location.vendor.status_changed";

pub const STREAM_NAME: &str = "LOCATION_UPDATES";
pub const WORKER_DURABLE: &str = "location-workers";

/// 更新流的保留上限，超限由总线侧丢弃到死信路径
const STREAM_MAX_MESSAGES: i64 = 1_000_000;
const STREAM_MAX_AGE_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("消息总线连接失败: {0}")]
    Connect(String),
    #[error("消息发布失败: {0}")]
    Publish(String),
    #[error("消息流初始化失败: {0}")]
    Stream(String),
    #[error("消息编码失败: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdateRequested {
    pub vendor_id: String,
    pub location: GeoPoint,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdated {
    pub vendor_id: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaEvent {
    pub user_id: String,
    pub vendor_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorStatusChanged {
    pub vendor_id: String,
    pub is_online: bool,
}

pub fn payload<T: Serialize>(value: &T) -> Result<Bytes, RelayError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| RelayError::Encode(e.to_string()))
}

/// 事件总线的窄接口：即发即弃给广播扇出用，持久化发布给
/// 位置更新的工作队列用。
#[async_trait]
pub trait EventBus: Send + Sync {
    /// 核心 NATS 发布，不等待任何确认
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), RelayError>;

    /// JetStream 发布，等待落盘确认；失败必须上抛而不是丢弃
    async fn publish_durable(&self, subject: &str, payload: Bytes) -> Result<(), RelayError>;
}

pub struct NatsBus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsBus {
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        tracing::info!("Connecting to NATS at {}", url);
        let client = async_nats::connect(url)
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        let jetstream = jetstream::new(client.clone());
        Ok(Self { client, jetstream })
    }

    pub fn client(&self) -> async_nats::Client {
        self.client.clone()
    }

    /// 工作队列流：每条更新消息恰好被一个工作者消费后删除
    pub async fn ensure_stream(&self) -> Result<jetstream::stream::Stream, RelayError> {
        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: STREAM_NAME.to_string(),
                subjects: vec![SUBJECT_UPDATE_REQUESTED.to_string()],
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                max_messages: STREAM_MAX_MESSAGES,
                max_age: std::time::Duration::from_secs(STREAM_MAX_AGE_SECS),
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| RelayError::Stream(e.to_string()))
    }

    /// 多个工作者共享同一个 durable 拉取消费者 = 队列组语义
    pub async fn worker_consumer(
        &self,
    ) -> Result<jetstream::consumer::Consumer<jetstream::consumer::pull::Config>, RelayError> {
        let stream = self.ensure_stream().await?;
        stream
            .get_or_create_consumer(
                WORKER_DURABLE,
                jetstream::consumer::pull::Config {
                    durable_name: Some(WORKER_DURABLE.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| RelayError::Stream(e.to_string()))
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), RelayError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| RelayError::Publish(e.to_string()))
    }

    async fn publish_durable(&self, subject: &str, payload: Bytes) -> Result<(), RelayError> {
        self.jetstream
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| RelayError::Publish(e.to_string()))?
            .await
            .map_err(|e| RelayError::Publish(e.to_string()))?;
        Ok(())
    }
}
