use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::pipeline::{MessageCtx, Pipeline, standard_pipeline};
use super::rate_limit::ConnectionRateLimiter;
use super::{Outbound, VendorInbound};
use crate::AppState;
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::relay::{self, LocationUpdateRequested, LocationUpdated, VendorStatusChanged};
use crate::utils::{ROLE_VENDOR, verify_token};

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// 商家侧网关：升级前校验令牌，升级后注册在线状态，
/// 然后进入消息循环
pub async fn vendor_ws(
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match verify_token(&query.token, &state.config) {
        Ok(claims) if claims.role == ROLE_VENDOR => claims,
        _ => return AppError::Unauthorized.into_response(),
    };
    ws.on_upgrade(move |socket| handle_vendor(socket, state, claims.sub))
}

async fn handle_vendor(socket: WebSocket, state: AppState, vendor_id: String) {
    let connection_id = Uuid::new_v4().to_string();

    // 在线状态写入失败就拒绝整个连接
    if let Err(e) = state.presence.register(&connection_id, &vendor_id).await {
        tracing::warn!(vendor_id, error = %e, "vendor connection rejected");
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    state.hub.register(&connection_id, tx);
    publish_status(&state, &vendor_id, true).await;

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
    let pipeline: Pipeline<VendorInbound> = standard_pipeline(state.presence.clone(), limiter);

    tracing::info!(vendor_id, connection_id, "vendor connected");
    while let Some(message) = stream.next().await {
        let Ok(message) = message else { break };
        match message {
            Message::Text(text) => {
                handle_vendor_frame(&state, &pipeline, &connection_id, text.as_str()).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    cleanup_vendor(&state, &connection_id, &vendor_id).await;
    writer.abort();
}

async fn handle_vendor_frame(
    state: &AppState,
    pipeline: &Pipeline<VendorInbound>,
    connection_id: &str,
    text: &str,
) {
    let frame: VendorInbound = match serde_json::from_str(text) {
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
    let Some(vendor_id) = ctx.entity_id else {
        return;
    };

    match ctx.frame {
        VendorInbound::UpdateLocation { lat, lng, .. } => {
            let location = GeoPoint::new(lat, lng);
            update_location(state, connection_id, &vendor_id, location).await;
        }
    }
}

/// 持久化走总线工作队列，网关不等待写入；给订阅房间的
/// 消费者即时广播一份原始更新，再给商家自己回确认
async fn update_location(
    state: &AppState,
    connection_id: &str,
    vendor_id: &str,
    location: GeoPoint,
) {
    let request = LocationUpdateRequested {
        vendor_id: vendor_id.to_string(),
        location,
        timestamp: Utc::now().timestamp_millis(),
    };
    let payload = match relay::payload(&request) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(vendor_id, error = %e, "failed to encode location update");
            return;
        }
    };
    if let Err(e) = state
        .bus
        .publish_durable(relay::SUBJECT_UPDATE_REQUESTED, payload)
        .await
    {
        // 更新不能静默丢弃：告知客户端重试
        tracing::error!(vendor_id, error = %e, "failed to enqueue location update");
        let err = AppError::BusUnavailable(e.to_string());
        state
            .hub
            .send_to(connection_id, Outbound::error_frame(&err));
        return;
    }

    let event = LocationUpdated {
        vendor_id: vendor_id.to_string(),
        location,
    };
    match relay::payload(&event) {
        Ok(bytes) => {
            if let Err(e) = state.bus.publish(relay::SUBJECT_LOCATION_UPDATED, bytes).await {
                tracing::warn!(vendor_id, error = %e, "failed to broadcast location update");
            }
        }
        Err(e) => tracing::warn!(vendor_id, error = %e, "failed to encode broadcast event"),
    }

    state.hub.send_to(
        connection_id,
        Outbound::LocationUpdated {
            entity_id: vendor_id.to_string(),
            location,
        },
    );
}

async fn publish_status(state: &AppState, vendor_id: &str, is_online: bool) {
    let event = VendorStatusChanged {
        vendor_id: vendor_id.to_string(),
        is_online,
    };
    match relay::payload(&event) {
        Ok(bytes) => {
            if let Err(e) = state.bus.publish(relay::SUBJECT_VENDOR_STATUS, bytes).await {
                tracing::warn!(vendor_id, is_online, error = %e, "failed to publish vendor status");
            }
        }
        Err(e) => tracing::warn!(vendor_id, error = %e, "failed to encode vendor status"),
    }
}

/// 断开清理只记日志不向上抛；清不掉的记录由 TTL 自愈
async fn cleanup_vendor(state: &AppState, connection_id: &str, registered_id: &str) {
    let vendor_id = match state.presence.resolve(connection_id).await {
        Ok(id) => id,
        // TTL 已过或查询失败时退回注册时拿到的ID
        Err(_) => registered_id.to_string(),
    };

    publish_status(state, &vendor_id, false).await;
    state.hub.remove(connection_id);
    if let Err(e) = state.presence.unregister(connection_id, &vendor_id).await {
        tracing::warn!(vendor_id, connection_id, error = %e, "vendor presence cleanup failed");
    }
    tracing::info!(vendor_id, connection_id, "vendor disconnected");
}
