use std::sync::Arc;

use async_nats::jetstream::consumer::{Consumer, pull};
use futures_util::StreamExt;

use super::{EventBus, LocationUpdateRequested, LocationUpdated, SUBJECT_LOCATION_UPDATED};
use crate::error::AppError;
use crate::geo::{GeoIndex, VENDOR_INDEX};

/// 位置更新工作者：从共享的 durable 消费者拉消息，写入
/// 地理索引后确认。处理失败不确认，交给总线按配置重投
/// 或转死信。
pub async fn run_worker(
    worker: usize,
    consumer: Consumer<pull::Config>,
    geo: Arc<GeoIndex>,
    bus: Arc<dyn EventBus>,
) {
    let mut messages = match consumer.messages().await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(worker, error = %e, "failed to open relay message stream");
            return;
        }
    };

    tracing::info!(worker, "location update worker started");
    while let Some(next) = messages.next().await {
        let message = match next {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(worker, error = %e, "relay message stream error");
                continue;
            }
        };

        match process_update(geo.as_ref(), bus.as_ref(), &message.payload).await {
            Ok(vendor_id) => {
                tracing::debug!(worker, vendor_id, "location update persisted");
                if let Err(e) = message.ack().await {
                    tracing::warn!(worker, error = %e, "failed to ack relay message");
                }
            }
            Err(e) => {
                tracing::warn!(worker, error = %e, "update processing failed, leaving for redelivery");
            }
        }
    }
    tracing::warn!(worker, "location update worker stopped");
}

/// 单条更新的处理逻辑：恰好一个工作者执行，最后写入者胜出
pub async fn process_update(
    geo: &GeoIndex,
    bus: &dyn EventBus,
    payload: &[u8],
) -> Result<String, AppError> {
    let request: LocationUpdateRequested = serde_json::from_slice(payload)
        .map_err(|e| AppError::Validation(format!("非法的位置更新消息: {e}")))?;

    geo.upsert(VENDOR_INDEX, &request.vendor_id, request.location)
        .await?;

    // 落盘后的通知面向下游广播，发布失败不影响已完成的写入
    let event = LocationUpdated {
        vendor_id: request.vendor_id.clone(),
        location: request.location,
    };
    match super::payload(&event) {
        Ok(bytes) => {
            if let Err(e) = bus.publish(SUBJECT_LOCATION_UPDATED, bytes).await {
                tracing::warn!(vendor_id = %request.vendor_id, error = %e, "failed to publish location_updated");
            }
        }
        Err(e) => {
            tracing::warn!(vendor_id = %request.vendor_id, error = %e, "failed to encode location_updated");
        }
    }

    Ok(request.vendor_id)
}
