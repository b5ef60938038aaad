use serde::{Deserialize, Serialize};

use crate::geo::{BoundingBox, GeoPoint};

#[derive(Debug, Deserialize)]
pub struct UpdateVendorLocationRequest {
    pub vendor_id: String,
    pub location: GeoPoint,
}

#[derive(Debug, Serialize)]
pub struct UpdateAck {
    pub vendor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub ne_lat: f64,
    pub ne_lng: f64,
    pub sw_lat: f64,
    pub sw_lng: f64,
}

impl NearbyQuery {
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox {
            ne: GeoPoint::new(self.ne_lat, self.ne_lng),
            sw: GeoPoint::new(self.sw_lat, self.sw_lng),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VendorIdQuery {
    pub vendor_id: String,
}
