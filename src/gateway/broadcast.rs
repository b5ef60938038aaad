use std::sync::Arc;

use futures_util::StreamExt;

use super::Outbound;
use super::hub::ConnectionHub;
use crate::relay::{self, LocationUpdated, VendorStatusChanged};

/// 跨网关广播：商家侧发布的领域事件经核心 NATS 到达每个
/// 网关实例，由本任务扇出给本地房间成员。两个网关角色
/// 因此互不直接调用，可独立扩容。
pub async fn run_broadcaster(client: async_nats::Client, hub: Arc<ConnectionHub>) {
    let mut updates = match client
        .subscribe(relay::SUBJECT_LOCATION_UPDATED.to_string())
        .await
    {
        Ok(sub) => sub,
        Err(e) => {
            tracing::error!(error = %e, "failed to subscribe to location updates");
            return;
        }
    };
    let mut statuses = match client
        .subscribe(relay::SUBJECT_VENDOR_STATUS.to_string())
        .await
    {
        Ok(sub) => sub,
        Err(e) => {
            tracing::error!(error = %e, "failed to subscribe to vendor status");
            return;
        }
    };

    tracing::info!("cross-gateway broadcaster started");
    loop {
        tokio::select! {
            message = updates.next() => {
                let Some(message) = message else { break };
                match serde_json::from_slice::<LocationUpdated>(&message.payload) {
                    Ok(event) => {
                        hub.broadcast_to_room(
                            &event.vendor_id,
                            &Outbound::LocationUpdated {
                                entity_id: event.vendor_id.clone(),
                                location: event.location,
                            },
                        );
                    }
                    Err(e) => tracing::warn!(error = %e, "malformed location_updated event"),
                }
            }
            message = statuses.next() => {
                let Some(message) = message else { break };
                match serde_json::from_slice::<VendorStatusChanged>(&message.payload) {
                    Ok(event) => {
                        hub.broadcast_to_room(
                            &event.vendor_id,
                            &Outbound::VendorStatusChanged {
                                vendor_id: event.vendor_id.clone(),
                                is_online: event.is_online,
                            },
                        );
                    }
                    Err(e) => tracing::warn!(error = %e, "malformed vendor status event"),
                }
            }
        }
    }
    tracing::warn!("cross-gateway broadcaster stopped");
}
