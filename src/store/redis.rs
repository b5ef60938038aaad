use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::{GeoEntry, GeoStore, PresenceStore, RoomStore, StoreError};
use crate::geo::GeoPoint;

// 在线状态与房间成员的键布局
const CONNECTION_KEY_PREFIX: &str = "connection:";
const ENTITY_KEY_PREFIX: &str = "entity:";

fn connection_key(connection_id: &str) -> String {
    format!("{}{}", CONNECTION_KEY_PREFIX, connection_id)
}

fn entity_key(entity_id: &str) -> String {
    format!("{}{}", ENTITY_KEY_PREFIX, entity_id)
}

fn rooms_key(consumer_id: &str) -> String {
    format!("consumer:{}:rooms", consumer_id)
}

/// 生产环境的共享存储：地理索引、在线状态、房间成员都在这里，
/// 网关实例因此可以无状态水平扩容。
pub struct RedisStore {
    client: Arc<redis::Client>,
}

impl RedisStore {
    pub fn new(client: Arc<redis::Client>) -> Self {
        Self { client }
    }

    async fn conn(&self) -> Result<MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn backend_err(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl GeoStore for RedisStore {
    async fn geo_add(
        &self,
        index: &str,
        entity_id: &str,
        point: GeoPoint,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        // GEOADD 参数顺序是 longitude, latitude
        let _: () = redis::cmd("GEOADD")
            .arg(index)
            .arg(point.longitude)
            .arg(point.latitude)
            .arg(entity_id)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn geo_search(
        &self,
        index: &str,
        center: GeoPoint,
        radius_meters: f64,
    ) -> Result<Vec<GeoEntry>, StoreError> {
        let mut conn = self.conn().await?;
        // WITHDIST 返回的距离由 Redis 按大圆计算，单位米
        let rows: Vec<(String, f64, (f64, f64))> = redis::cmd("GEOSEARCH")
            .arg(index)
            .arg("FROMLONLAT")
            .arg(center.longitude)
            .arg(center.latitude)
            .arg("BYRADIUS")
            .arg(radius_meters)
            .arg("m")
            .arg("ASC")
            .arg("WITHDIST")
            .arg("WITHCOORD")
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;

        Ok(rows
            .into_iter()
            .map(|(entity_id, distance_meters, (lng, lat))| GeoEntry {
                entity_id,
                point: GeoPoint::new(lat, lng),
                distance_meters,
            })
            .collect())
    }

    async fn geo_remove(&self, index: &str, entity_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        // GEO 索引底层是有序集合，删除成员即删除记录
        let _: () = redis::cmd("ZREM")
            .arg(index)
            .arg(entity_id)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn geo_position(
        &self,
        index: &str,
        entity_id: &str,
    ) -> Result<Option<GeoPoint>, StoreError> {
        let mut conn = self.conn().await?;
        let positions: Vec<Option<(f64, f64)>> = redis::cmd("GEOPOS")
            .arg(index)
            .arg(entity_id)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;

        Ok(positions
            .into_iter()
            .next()
            .flatten()
            .map(|(lng, lat)| GeoPoint::new(lat, lng)))
    }
}

#[async_trait]
impl PresenceStore for RedisStore {
    async fn register(
        &self,
        connection_id: &str,
        entity_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        // 原子写入两个方向，避免出现只有单向映射的中间态
        let _: () = redis::pipe()
            .atomic()
            .set_ex(connection_key(connection_id), entity_id, ttl.as_secs())
            .set_ex(entity_key(entity_id), connection_id, ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn touch(
        &self,
        connection_id: &str,
        ttl: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        let entity_id: Option<String> = conn
            .get(connection_key(connection_id))
            .await
            .map_err(backend_err)?;

        if let Some(ref entity_id) = entity_id {
            let _: () = redis::pipe()
                .atomic()
                .expire(connection_key(connection_id), ttl.as_secs() as i64)
                .expire(entity_key(entity_id), ttl.as_secs() as i64)
                .query_async(&mut conn)
                .await
                .map_err(backend_err)?;
        }

        Ok(entity_id)
    }

    async fn resolve(&self, connection_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        conn.get(connection_key(connection_id))
            .await
            .map_err(backend_err)
    }

    async fn unregister(&self, connection_id: &str, entity_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .del(connection_key(connection_id))
            .del(entity_key(entity_id))
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }
}

#[async_trait]
impl RoomStore for RedisStore {
    async fn rooms_of(&self, consumer_id: &str) -> Result<HashSet<String>, StoreError> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn
            .smembers(rooms_key(consumer_id))
            .await
            .map_err(backend_err)?;
        Ok(members.into_iter().collect())
    }

    async fn add_room(
        &self,
        consumer_id: &str,
        vendor_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        // 写入顺带续期：集合的生命周期跟随消费者的活跃度
        let _: () = redis::pipe()
            .atomic()
            .sadd(rooms_key(consumer_id), vendor_id)
            .expire(rooms_key(consumer_id), ttl.as_secs() as i64)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn remove_room(
        &self,
        consumer_id: &str,
        vendor_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .srem(rooms_key(consumer_id), vendor_id)
            .expire(rooms_key(consumer_id), ttl.as_secs() as i64)
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn clear_rooms(&self, consumer_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(rooms_key(consumer_id)).await.map_err(backend_err)?;
        Ok(())
    }
}
