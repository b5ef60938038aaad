use axum::extract::{Json, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::model::{NearbyQuery, UpdateAck, UpdateVendorLocationRequest, VendorIdQuery};
use crate::AppState;
use crate::geo::VENDOR_INDEX;
use crate::rooms::NearbyVendor;
use crate::utils::{error_to_api_response, success_to_api_response};

// 内部服务调用的RPC面（档案CRUD等非核心协作方使用）

#[axum::debug_handler]
pub async fn update_vendor_location(
    State(state): State<AppState>,
    Json(req): Json<UpdateVendorLocationRequest>,
) -> impl IntoResponse {
    match state
        .geo
        .upsert(VENDOR_INDEX, &req.vendor_id, req.location)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            success_to_api_response(UpdateAck {
                vendor_id: req.vendor_id,
            }),
        ),
        Err(e) => (
            e.status(),
            error_to_api_response(e.code(), e.public_message()),
        ),
    }
}

#[axum::debug_handler]
pub async fn nearby_vendors(
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
) -> impl IntoResponse {
    let bbox = query.bounding_box();
    if let Err(e) = bbox.validate() {
        return (
            e.status(),
            error_to_api_response(e.code(), e.public_message()),
        );
    }

    let (center, radius) = bbox.bounding_circle();
    let radius = radius.min(state.config.max_search_radius);

    match state.geo.within_radius(VENDOR_INDEX, center, radius).await {
        Ok(hits) => {
            let vendors = hits
                .into_iter()
                .map(|h| NearbyVendor {
                    vendor_id: h.entity_id,
                    location: h.point,
                    distance_meters: h.distance_meters,
                })
                .collect::<Vec<_>>();
            (StatusCode::OK, success_to_api_response(vendors))
        }
        Err(e) => (
            e.status(),
            error_to_api_response(e.code(), e.public_message()),
        ),
    }
}

/// 商家永久下线时的显式删除入口
#[axum::debug_handler]
pub async fn remove_vendor_location(
    State(state): State<AppState>,
    Query(query): Query<VendorIdQuery>,
) -> impl IntoResponse {
    match state.geo.remove(VENDOR_INDEX, &query.vendor_id).await {
        Ok(()) => (
            StatusCode::OK,
            success_to_api_response(UpdateAck {
                vendor_id: query.vendor_id,
            }),
        ),
        Err(e) => (
            e.status(),
            error_to_api_response(e.code(), e.public_message()),
        ),
    }
}
