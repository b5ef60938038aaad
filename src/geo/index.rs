use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AppError;
use crate::store::{GeoEntry, GeoStore, StoreError};

use super::GeoPoint;

/// 地理索引的查询引擎：坐标校验在前，存储调用带限时和
/// 有界重试，重试耗尽后以 StoreUnavailable 上抛，绝不静默。
pub struct GeoIndex {
    store: Arc<dyn GeoStore>,
    attempts: u32,
    retry_delay: Duration,
    op_timeout: Duration,
}

impl GeoIndex {
    pub fn new(
        store: Arc<dyn GeoStore>,
        attempts: u32,
        retry_delay: Duration,
        op_timeout: Duration,
    ) -> Self {
        Self {
            store,
            attempts: attempts.max(1),
            retry_delay,
            op_timeout,
        }
    }

    /// 幂等写入，最后写入者胜出
    pub async fn upsert(
        &self,
        index: &str,
        entity_id: &str,
        point: GeoPoint,
    ) -> Result<(), AppError> {
        point.validate()?;
        self.with_retry("geo.upsert", entity_id, || {
            self.store.geo_add(index, entity_id, point)
        })
        .await
    }

    pub async fn within_radius(
        &self,
        index: &str,
        center: GeoPoint,
        radius_meters: f64,
    ) -> Result<Vec<GeoEntry>, AppError> {
        center.validate()?;
        if !radius_meters.is_finite() || radius_meters < 0.0 {
            return Err(AppError::Validation(format!(
                "查询半径非法: {}",
                radius_meters
            )));
        }
        self.with_retry("geo.within_radius", index, || {
            self.store.geo_search(index, center, radius_meters)
        })
        .await
    }

    pub async fn remove(&self, index: &str, entity_id: &str) -> Result<(), AppError> {
        self.with_retry("geo.remove", entity_id, || {
            self.store.geo_remove(index, entity_id)
        })
        .await
    }

    pub async fn current_position(
        &self,
        index: &str,
        entity_id: &str,
    ) -> Result<Option<GeoPoint>, AppError> {
        self.with_retry("geo.current_position", entity_id, || {
            self.store.geo_position(index, entity_id)
        })
        .await
    }

    async fn with_retry<T, Fut>(
        &self,
        op: &'static str,
        context: &str,
        call: impl Fn() -> Fut,
    ) -> Result<T, AppError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut last_error = StoreError::Timeout;
        for attempt in 1..=self.attempts {
            match tokio::time::timeout(self.op_timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    tracing::warn!(op, context, attempt, error = %e, "store operation failed");
                    last_error = e;
                }
                Err(_) => {
                    tracing::warn!(op, context, attempt, "store operation timed out");
                    last_error = StoreError::Timeout;
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        tracing::error!(op, context, error = %last_error, "store operation exhausted retries");
        Err(AppError::store(op, context, last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::VENDOR_INDEX;
    use crate::store::memory::MemoryGeoStore;
    use proptest::prelude::*;

    fn index(store: Arc<MemoryGeoStore>) -> GeoIndex {
        GeoIndex::new(
            store,
            3,
            Duration::from_millis(1),
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn upsert_then_current_position_round_trips() {
        let store = Arc::new(MemoryGeoStore::new());
        let geo = index(store);
        let p = GeoPoint::new(40.0, -74.0);

        geo.upsert(VENDOR_INDEX, "v1", p).await.unwrap();
        let got = geo.current_position(VENDOR_INDEX, "v1").await.unwrap();
        assert_eq!(got, Some(p));
    }

    #[tokio::test]
    async fn out_of_range_rejected_before_store() {
        let store = Arc::new(MemoryGeoStore::new());
        let geo = index(store.clone());

        let err = geo
            .upsert(VENDOR_INDEX, "v1", GeoPoint::new(91.0, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        // 校验失败不允许打到存储层
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn three_failures_surface_store_unavailable() {
        let store = Arc::new(MemoryGeoStore::new());
        store.fail_next(3);
        let geo = index(store.clone());

        let err = geo
            .upsert(VENDOR_INDEX, "v1", GeoPoint::new(1.0, 1.0))
            .await
            .unwrap_err();
        match err {
            AppError::StoreUnavailable { op, context, .. } => {
                assert_eq!(op, "geo.upsert");
                assert_eq!(context, "v1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.call_count(), 3);
    }

    #[tokio::test]
    async fn recovers_on_second_attempt() {
        let store = Arc::new(MemoryGeoStore::new());
        store.fail_next(1);
        let geo = index(store.clone());

        geo.upsert(VENDOR_INDEX, "v1", GeoPoint::new(1.0, 1.0))
            .await
            .unwrap();
        assert_eq!(store.call_count(), 2);
    }

    #[tokio::test]
    async fn within_radius_filters_by_distance() {
        let store = Arc::new(MemoryGeoStore::new());
        let geo = index(store);
        geo.upsert(VENDOR_INDEX, "near", GeoPoint::new(40.001, -74.0))
            .await
            .unwrap();
        geo.upsert(VENDOR_INDEX, "far", GeoPoint::new(41.0, -74.0))
            .await
            .unwrap();

        let hits = geo
            .within_radius(VENDOR_INDEX, GeoPoint::new(40.0, -74.0), 1000.0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, "near");
        assert!(hits[0].distance_meters < 1000.0);
    }

    #[tokio::test]
    async fn negative_radius_rejected() {
        let store = Arc::new(MemoryGeoStore::new());
        let geo = index(store);
        let err = geo
            .within_radius(VENDOR_INDEX, GeoPoint::new(0.0, 0.0), -5.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    proptest! {
        #[test]
        fn round_trip_for_all_valid_coordinates(
            lat in -90.0f64..=90.0,
            lng in -180.0f64..=180.0,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            rt.block_on(async {
                let store = Arc::new(MemoryGeoStore::new());
                let geo = index(store);
                let p = GeoPoint::new(lat, lng);
                geo.upsert(VENDOR_INDEX, "e", p).await.unwrap();
                let got = geo.current_position(VENDOR_INDEX, "e").await.unwrap();
                assert_eq!(got, Some(p));
            });
        }
    }
}
