use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::geo::{BoundingBox, GeoPoint, validate_accuracy};
use crate::rooms::NearbyVendor;

pub mod broadcast;
pub mod consumer;
pub mod hub;
pub mod pipeline;
pub mod rate_limit;
pub mod vendor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    UpdateLocation,
    UpdateViewport,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::UpdateLocation => "update_location",
            MessageKind::UpdateViewport => "update_viewport",
        }
    }
}

/// 入站帧统一接口，守卫流水线按类型限流、按内容校验
pub trait InboundFrame {
    fn kind(&self) -> MessageKind;
    fn validate(&self) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VendorInbound {
    UpdateLocation {
        lat: f64,
        lng: f64,
        #[serde(default)]
        accuracy: Option<f64>,
    },
}

impl InboundFrame for VendorInbound {
    fn kind(&self) -> MessageKind {
        match self {
            VendorInbound::UpdateLocation { .. } => MessageKind::UpdateLocation,
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        match self {
            VendorInbound::UpdateLocation { lat, lng, accuracy } => {
                GeoPoint::new(*lat, *lng).validate()?;
                validate_accuracy(*accuracy)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsumerInbound {
    UpdateViewport { ne: GeoPoint, sw: GeoPoint },
}

impl ConsumerInbound {
    pub fn viewport(&self) -> BoundingBox {
        match self {
            ConsumerInbound::UpdateViewport { ne, sw } => BoundingBox { ne: *ne, sw: *sw },
        }
    }
}

impl InboundFrame for ConsumerInbound {
    fn kind(&self) -> MessageKind {
        match self {
            ConsumerInbound::UpdateViewport { .. } => MessageKind::UpdateViewport,
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        self.viewport().validate()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Outbound {
    LocationUpdated {
        entity_id: String,
        location: GeoPoint,
    },
    VendorChannels {
        vendors: Vec<NearbyVendor>,
    },
    VendorStatusChanged {
        vendor_id: String,
        is_online: bool,
    },
    Error {
        code: i32,
        message: String,
    },
}

impl Outbound {
    pub fn error_frame(err: &AppError) -> Self {
        Outbound::Error {
            code: err.code(),
            message: err.public_message(),
        }
    }
}
