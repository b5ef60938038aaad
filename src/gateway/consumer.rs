use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::pipeline::{MessageCtx, Pipeline, standard_pipeline};
use super::rate_limit::ConnectionRateLimiter;
use super::vendor::WsAuthQuery;
use super::{ConsumerInbound, Outbound};
use crate::AppState;
use crate::error::AppError;
use crate::geo::USER_INDEX;
use crate::utils::{ROLE_USER, verify_token};

/// 消费者侧网关：视野上报驱动房间对账，订阅集合始终
/// 跟随最近一次邻近查询结果
pub async fn consumer_ws(
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match verify_token(&query.token, &state.config) {
        Ok(claims) if claims.role == ROLE_USER => claims,
        _ => return AppError::Unauthorized.into_response(),
    };
    ws.on_upgrade(move |socket| handle_consumer(socket, state, claims.sub))
}

async fn handle_consumer(socket: WebSocket, state: AppState, consumer_id: String) {
    let connection_id = Uuid::new_v4().to_string();

    if let Err(e) = state.presence.register(&connection_id, &consumer_id).await {
        tracing::warn!(consumer_id, error = %e, "consumer connection rejected");
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    state.hub.register(&connection_id, tx);

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let limiter = Arc::new(ConnectionRateLimiter::from_config(&state.config));
    let pipeline: Pipeline<ConsumerInbound> = standard_pipeline(state.presence.clone(), limiter);

    tracing::info!(consumer_id, connection_id, "consumer connected");
    while let Some(message) = stream.next().await {
        let Ok(message) = message else { break };
        match message {
            Message::Text(text) => {
                handle_consumer_frame(&state, &pipeline, &connection_id, text.as_str()).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    cleanup_consumer(&state, &connection_id, &consumer_id).await;
    writer.abort();
}

async fn handle_consumer_frame(
    state: &AppState,
    pipeline: &Pipeline<ConsumerInbound>,
    connection_id: &str,
    text: &str,
) {
    let frame: ConsumerInbound = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            let err = AppError::Validation(format!("消息格式非法: {e}"));
            state
                .hub
                .send_to(connection_id, Outbound::error_frame(&err));
            return;
        }
    };

    let mut ctx = MessageCtx::new(connection_id, frame);
    if let Err(e) = pipeline.run(&mut ctx).await {
        state.hub.send_to(connection_id, Outbound::error_frame(&e));
        return;
    }
    let Some(consumer_id) = ctx.entity_id else {
        return;
    };

    let viewport = ctx.frame.viewport();
    match state
        .reconciler
        .reconcile_viewport(&consumer_id, connection_id, viewport)
        .await
    {
        Ok(vendors) => {
            // 对账完成后把完整的商家列表作为权威视图推回去
            state
                .hub
                .send_to(connection_id, Outbound::VendorChannels { vendors });
            record_consumer_position(state, &consumer_id, viewport);
        }
        Err(e) => {
            tracing::error!(consumer_id, error = %e, "viewport reconciliation failed");
            state.hub.send_to(connection_id, Outbound::error_frame(&e));
        }
    }
}

/// 把视野中心写入用户位置索引，尽力而为，不拖慢视野响应
fn record_consumer_position(state: &AppState, consumer_id: &str, viewport: crate::geo::BoundingBox) {
    let geo = state.geo.clone();
    let consumer_id = consumer_id.to_string();
    let (center, _) = viewport.bounding_circle();
    tokio::spawn(async move {
        if let Err(e) = geo.upsert(USER_INDEX, &consumer_id, center).await {
            tracing::warn!(consumer_id, error = %e, "failed to record consumer position");
        }
    });
}

async fn cleanup_consumer(state: &AppState, connection_id: &str, registered_id: &str) {
    let consumer_id = match state.presence.resolve(connection_id).await {
        Ok(id) => id,
        Err(_) => registered_id.to_string(),
    };

    if let Err(e) = state
        .reconciler
        .clear_consumer(&consumer_id, connection_id)
        .await
    {
        tracing::warn!(consumer_id, connection_id, error = %e, "room cleanup failed");
    }
    state.hub.remove(connection_id);
    if let Err(e) = state.presence.unregister(connection_id, &consumer_id).await {
        tracing::warn!(consumer_id, connection_id, error = %e, "consumer presence cleanup failed");
    }
    tracing::info!(consumer_id, connection_id, "consumer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppState;
    use crate::config::Config;
    use crate::gateway::hub::ConnectionHub;
    use crate::geo::{BoundingBox, GeoIndex, GeoPoint, VENDOR_INDEX};
    use crate::presence::PresenceService;
    use crate::store::RoomStore;
    use crate::relay::EventBus;
    use crate::rooms::Reconciler;
    use crate::store::GeoStore;
    use crate::store::memory::{MemoryBus, MemoryGeoStore, MemoryPresenceStore, MemoryRoomStore};
    use std::sync::Arc;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            redis_url: "redis://localhost".into(),
            nats_url: "nats://localhost".into(),
            jwt_secret: "test-secret".into(),
            server_host: "127.0.0.1".into(),
            server_port: 0,
            api_base_uri: "/api/v1".into(),
            presence_ttl_secs: 600,
            store_timeout_ms: 500,
            store_retry_attempts: 3,
            store_retry_delay_ms: 1,
            max_search_radius: 50_000.0,
            rate_limit_window_secs: 60,
            rate_limit_requests: 100,
            ws_rate_window_secs: 10,
            location_updates_per_window: 50,
            viewport_queries_per_window: 10,
            relay_workers: 1,
        }
    }

    fn state() -> (AppState, Arc<MemoryGeoStore>, Arc<MemoryRoomStore>) {
        let geo_store = Arc::new(MemoryGeoStore::new());
        let geo = Arc::new(GeoIndex::new(
            geo_store.clone(),
            3,
            Duration::from_millis(1),
            Duration::from_millis(500),
        ));
        let presence = Arc::new(PresenceService::new(
            Arc::new(MemoryPresenceStore::new()),
            Duration::from_secs(600),
            Duration::from_secs(2),
        ));
        let rooms = Arc::new(MemoryRoomStore::new());
        let hub = Arc::new(ConnectionHub::new());
        let bus = Arc::new(MemoryBus::new());
        // 房间 TTL 远大于在线 TTL，确保断言打到清理逻辑本身
        let reconciler = Arc::new(Reconciler::new(
            geo.clone(),
            rooms.clone(),
            hub.clone(),
            bus.clone() as Arc<dyn EventBus>,
            50_000.0,
            Duration::from_secs(3600),
        ));
        let state = AppState {
            config: test_config(),
            geo,
            presence,
            reconciler,
            hub,
            bus,
        };
        (state, geo_store, rooms)
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_falls_back_to_registered_id_after_ttl() {
        let (state, geo_store, rooms) = state();
        state.presence.register("conn-1", "u1").await.unwrap();
        geo_store
            .geo_add(VENDOR_INDEX, "v1", GeoPoint::new(40.0, -74.0))
            .await
            .unwrap();

        let viewport = BoundingBox {
            ne: GeoPoint::new(40.01, -73.99),
            sw: GeoPoint::new(39.99, -74.01),
        };
        state
            .reconciler
            .reconcile_viewport("u1", "conn-1", viewport)
            .await
            .unwrap();
        assert_eq!(state.hub.room_size("v1"), 1);

        // 在线记录先于房间集合过期：resolve 失败，清理必须退回
        // 注册时拿到的ID，仍要把订阅和成员记录清干净
        tokio::time::advance(Duration::from_secs(601)).await;
        cleanup_consumer(&state, "conn-1", "u1").await;

        assert!(rooms.rooms_of("u1").await.unwrap().is_empty());
        assert_eq!(state.hub.room_size("v1"), 0);
        assert!(state.presence.resolve("conn-1").await.is_err());
    }
}
