use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub mod index;
pub mod math;

pub use index::GeoIndex;

/// 地理索引键名（商家/用户各一份，全局共享）
pub const VENDOR_INDEX: &str = "vendor_locations";
pub const USER_INDEX: &str = "user_locations";

pub const MAX_ACCURACY_METERS: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(AppError::Validation(format!(
                "纬度超出范围: {}",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(AppError::Validation(format!(
                "经度超出范围: {}",
                self.longitude
            )));
        }
        Ok(())
    }
}

pub fn validate_accuracy(accuracy: Option<f64>) -> Result<(), AppError> {
    if let Some(acc) = accuracy {
        if !acc.is_finite() || !(0.0..=MAX_ACCURACY_METERS).contains(&acc) {
            return Err(AppError::Validation(format!("定位精度超出范围: {}", acc)));
        }
    }
    Ok(())
}

/// 客户端上报的矩形视野，只作派生输入，不落存储
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub ne: GeoPoint,
    pub sw: GeoPoint,
}

impl BoundingBox {
    /// 要求 ne 在 sw 的东北方向；跨反子午线的视野会被拒绝，
    /// 算术中点对那种矩形会落到地球另一侧
    pub fn validate(&self) -> Result<(), AppError> {
        self.ne.validate()?;
        self.sw.validate()?;
        if self.ne.latitude < self.sw.latitude || self.ne.longitude < self.sw.longitude {
            return Err(AppError::Validation(
                "视野矩形非法: ne 必须位于 sw 的东北方向".into(),
            ));
        }
        Ok(())
    }

    /// 矩形视野化归为外接圆：圆心取 ne/sw 的算术中点，半径取
    /// ne↔sw 大圆对角线的一半。对经纬度对齐的矩形，两条大圆
    /// 对角线等长（haversine 只依赖两端纬度与经度差），因此圆
    /// 覆盖全部四角。有意多覆盖矩形外的月牙区域，换取单一
    /// 半径查询。
    pub fn bounding_circle(&self) -> (GeoPoint, f64) {
        let center = math::midpoint(self.ne, self.sw);
        let radius = math::haversine_meters(self.ne, self.sw) / 2.0;
        (center, radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_out_of_range_latitude() {
        assert!(GeoPoint::new(90.1, 0.0).validate().is_err());
        assert!(GeoPoint::new(-91.0, 0.0).validate().is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_longitude() {
        assert!(GeoPoint::new(0.0, 180.5).validate().is_err());
        assert!(GeoPoint::new(0.0, -200.0).validate().is_err());
    }

    #[test]
    fn accepts_boundary_coordinates() {
        assert!(GeoPoint::new(90.0, 180.0).validate().is_ok());
        assert!(GeoPoint::new(-90.0, -180.0).validate().is_ok());
    }

    #[test]
    fn rejects_inverted_viewport() {
        // 跨反子午线（sw.lng > ne.lng）或上下颠倒的矩形都不合法
        let crossing = BoundingBox {
            ne: GeoPoint::new(10.0, -179.5),
            sw: GeoPoint::new(9.0, 179.5),
        };
        assert!(matches!(crossing.validate(), Err(AppError::Validation(_))));

        let flipped = BoundingBox {
            ne: GeoPoint::new(39.9, -74.0),
            sw: GeoPoint::new(40.1, -74.1),
        };
        assert!(matches!(flipped.validate(), Err(AppError::Validation(_))));

        let normal = BoundingBox {
            ne: GeoPoint::new(40.1, -73.9),
            sw: GeoPoint::new(39.9, -74.1),
        };
        assert!(normal.validate().is_ok());
    }

    #[test]
    fn accuracy_bounds() {
        assert!(validate_accuracy(None).is_ok());
        assert!(validate_accuracy(Some(0.0)).is_ok());
        assert!(validate_accuracy(Some(1000.0)).is_ok());
        assert!(validate_accuracy(Some(-1.0)).is_err());
        assert!(validate_accuracy(Some(1000.1)).is_err());
    }

    proptest! {
        // 城市尺度的视野：外接圆必须覆盖矩形四角
        #[test]
        fn bounding_circle_covers_all_corners(
            lat in -60.0f64..60.0,
            lng in -179.0f64..179.0,
            dlat in 0.0001f64..0.5,
            dlng in 0.0001f64..0.5,
        ) {
            let sw = GeoPoint::new(lat, lng);
            let ne = GeoPoint::new(lat + dlat, lng + dlng);
            let bbox = BoundingBox { ne, sw };
            let (center, radius) = bbox.bounding_circle();

            let corners = [
                ne,
                sw,
                GeoPoint::new(ne.latitude, sw.longitude),
                GeoPoint::new(sw.latitude, ne.longitude),
            ];
            let slack = radius * 1e-4 + 1.0;
            for corner in corners {
                let d = math::haversine_meters(center, corner);
                prop_assert!(
                    d <= radius + slack,
                    "corner {:?} at {}m outside radius {}m",
                    corner, d, radius
                );
            }
        }
    }
}
