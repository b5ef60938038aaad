use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::AppError;
use crate::gateway::hub::ConnectionHub;
use crate::geo::{BoundingBox, GeoIndex, GeoPoint, VENDOR_INDEX};
use crate::relay::{self, AreaEvent, EventBus};
use crate::store::RoomStore;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NearbyVendor {
    pub vendor_id: String,
    pub location: GeoPoint,
    pub distance_meters: f64,
}

#[derive(Debug, Default, PartialEq)]
pub struct RoomDiff {
    pub to_join: Vec<String>,
    pub to_leave: Vec<String>,
}

/// 集合差分：只动变化的部分，留在范围内的商家订阅不动，
/// 避免清空重加造成的闪烁和漏消息窗口
pub fn diff_rooms(current: &HashSet<String>, nearby: &HashSet<String>) -> RoomDiff {
    RoomDiff {
        to_join: nearby.difference(current).cloned().collect(),
        to_leave: current.difference(nearby).cloned().collect(),
    }
}

/// 房间成员对账：每次视野上报后，把消费者的订阅集合
/// 调整到与最新邻近查询结果一致。最终一致，由上报频率
/// 决定滞后上限。
pub struct Reconciler {
    geo: Arc<GeoIndex>,
    rooms: Arc<dyn RoomStore>,
    hub: Arc<ConnectionHub>,
    bus: Arc<dyn EventBus>,
    max_radius: f64,
    /// 成员集合的存活兜底，随每次写入续期
    rooms_ttl: Duration,
}

impl Reconciler {
    pub fn new(
        geo: Arc<GeoIndex>,
        rooms: Arc<dyn RoomStore>,
        hub: Arc<ConnectionHub>,
        bus: Arc<dyn EventBus>,
        max_radius: f64,
        rooms_ttl: Duration,
    ) -> Self {
        Self {
            geo,
            rooms,
            hub,
            bus,
            max_radius,
            rooms_ttl,
        }
    }

    pub async fn reconcile_viewport(
        &self,
        consumer_id: &str,
        connection_id: &str,
        viewport: BoundingBox,
    ) -> Result<Vec<NearbyVendor>, AppError> {
        let (center, radius) = viewport.bounding_circle();
        let radius = radius.min(self.max_radius);

        let hits = self.geo.within_radius(VENDOR_INDEX, center, radius).await?;
        let nearby: HashSet<String> = hits.iter().map(|h| h.entity_id.clone()).collect();

        let current = self
            .rooms
            .rooms_of(consumer_id)
            .await
            .map_err(|e| AppError::store("rooms.read", format!("consumer={consumer_id}"), e))?;

        let diff = diff_rooms(&current, &nearby);

        for vendor_id in &diff.to_leave {
            self.hub.leave(vendor_id, connection_id);
            self.rooms
                .remove_room(consumer_id, vendor_id, self.rooms_ttl)
                .await
                .map_err(|e| {
                    AppError::store("rooms.remove", format!("consumer={consumer_id}"), e)
                })?;
            self.emit_area_event(relay::SUBJECT_LEFT_AREA, consumer_id, vendor_id)
                .await;
        }

        for vendor_id in &diff.to_join {
            self.hub.join(vendor_id, connection_id);
            self.rooms
                .add_room(consumer_id, vendor_id, self.rooms_ttl)
                .await
                .map_err(|e| AppError::store("rooms.add", format!("consumer={consumer_id}"), e))?;
            self.emit_area_event(relay::SUBJECT_ENTERED_AREA, consumer_id, vendor_id)
                .await;
        }

        Ok(hits
            .into_iter()
            .map(|h| NearbyVendor {
                vendor_id: h.entity_id,
                location: h.point,
                distance_meters: h.distance_meters,
            })
            .collect())
    }

    /// 消费者断开：清空订阅与成员记录。调用方负责吞错误，
    /// 残留记录靠 TTL 与下次对账自愈。
    pub async fn clear_consumer(
        &self,
        consumer_id: &str,
        connection_id: &str,
    ) -> Result<(), AppError> {
        self.hub.leave_all(connection_id);
        self.rooms
            .clear_rooms(consumer_id)
            .await
            .map_err(|e| AppError::store("rooms.clear", format!("consumer={consumer_id}"), e))
    }

    /// 进出区域事件只是尽力而为，对正确性没有影响
    async fn emit_area_event(&self, subject: &str, user_id: &str, vendor_id: &str) {
        let event = AreaEvent {
            user_id: user_id.to_string(),
            vendor_id: vendor_id.to_string(),
        };
        let bytes = match relay::payload(&event) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode area event");
                return;
            }
        };
        if let Err(e) = self.bus.publish(subject, bytes).await {
            tracing::warn!(subject, user_id, vendor_id, error = %e, "failed to publish area event");
        }
    }
}
