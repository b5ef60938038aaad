//! 测试用的内存存储与内存总线：语义对齐 Redis/NATS 实现，
//! 时间基于 tokio 时钟，便于在暂停时钟下验证 TTL 行为。

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use super::{GeoEntry, GeoStore, PresenceStore, RoomStore, StoreError};
use crate::geo::{GeoPoint, math};
use crate::relay::{EventBus, RelayError};

#[derive(Default)]
pub struct MemoryGeoStore {
    points: Mutex<HashMap<(String, String), GeoPoint>>,
    calls: Mutex<u32>,
    fail_remaining: Mutex<u32>,
}

impl MemoryGeoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注入接下来 n 次调用失败
    pub fn fail_next(&self, n: u32) {
        *self.fail_remaining.lock().unwrap() = n;
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }

    fn gate(&self) -> Result<(), StoreError> {
        *self.calls.lock().unwrap() += 1;
        let mut remaining = self.fail_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GeoStore for MemoryGeoStore {
    async fn geo_add(
        &self,
        index: &str,
        entity_id: &str,
        point: GeoPoint,
    ) -> Result<(), StoreError> {
        self.gate()?;
        self.points
            .lock()
            .unwrap()
            .insert((index.to_string(), entity_id.to_string()), point);
        Ok(())
    }

    async fn geo_search(
        &self,
        index: &str,
        center: GeoPoint,
        radius_meters: f64,
    ) -> Result<Vec<GeoEntry>, StoreError> {
        self.gate()?;
        let mut hits: Vec<GeoEntry> = self
            .points
            .lock()
            .unwrap()
            .iter()
            .filter(|((idx, _), _)| idx == index)
            .filter_map(|((_, entity_id), point)| {
                let distance_meters = math::haversine_meters(center, *point);
                (distance_meters <= radius_meters).then(|| GeoEntry {
                    entity_id: entity_id.clone(),
                    point: *point,
                    distance_meters,
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        Ok(hits)
    }

    async fn geo_remove(&self, index: &str, entity_id: &str) -> Result<(), StoreError> {
        self.gate()?;
        self.points
            .lock()
            .unwrap()
            .remove(&(index.to_string(), entity_id.to_string()));
        Ok(())
    }

    async fn geo_position(
        &self,
        index: &str,
        entity_id: &str,
    ) -> Result<Option<GeoPoint>, StoreError> {
        self.gate()?;
        Ok(self
            .points
            .lock()
            .unwrap()
            .get(&(index.to_string(), entity_id.to_string()))
            .copied())
    }
}

#[derive(Default)]
pub struct MemoryPresenceStore {
    // connection_id -> (entity_id, 过期时刻)
    conns: Mutex<HashMap<String, (String, Instant)>>,
    entities: Mutex<HashMap<String, String>>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_for(&self, entity_id: &str) -> Option<String> {
        self.entities.lock().unwrap().get(entity_id).cloned()
    }

    fn live_entity(&self, connection_id: &str) -> Option<String> {
        let mut conns = self.conns.lock().unwrap();
        match conns.get(connection_id) {
            Some((entity_id, deadline)) if *deadline > Instant::now() => Some(entity_id.clone()),
            Some((entity_id, _)) => {
                // TTL 已过，等价于 Redis 的键过期
                let entity_id = entity_id.clone();
                conns.remove(connection_id);
                self.entities.lock().unwrap().remove(&entity_id);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn register(
        &self,
        connection_id: &str,
        entity_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.conns.lock().unwrap().insert(
            connection_id.to_string(),
            (entity_id.to_string(), Instant::now() + ttl),
        );
        self.entities
            .lock()
            .unwrap()
            .insert(entity_id.to_string(), connection_id.to_string());
        Ok(())
    }

    async fn touch(
        &self,
        connection_id: &str,
        ttl: Duration,
    ) -> Result<Option<String>, StoreError> {
        let Some(entity_id) = self.live_entity(connection_id) else {
            return Ok(None);
        };
        self.conns.lock().unwrap().insert(
            connection_id.to_string(),
            (entity_id.clone(), Instant::now() + ttl),
        );
        Ok(Some(entity_id))
    }

    async fn resolve(&self, connection_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live_entity(connection_id))
    }

    async fn unregister(&self, connection_id: &str, entity_id: &str) -> Result<(), StoreError> {
        self.conns.lock().unwrap().remove(connection_id);
        self.entities.lock().unwrap().remove(entity_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRoomStore {
    // consumer_id -> (房间集合, 过期时刻)
    rooms: Mutex<HashMap<String, (HashSet<String>, Instant)>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn rooms_of(&self, consumer_id: &str) -> Result<HashSet<String>, StoreError> {
        let mut rooms = self.rooms.lock().unwrap();
        match rooms.get(consumer_id) {
            Some((set, deadline)) if *deadline > Instant::now() => Ok(set.clone()),
            Some(_) => {
                // TTL 已过，集合整体消失
                rooms.remove(consumer_id);
                Ok(HashSet::new())
            }
            None => Ok(HashSet::new()),
        }
    }

    async fn add_room(
        &self,
        consumer_id: &str,
        vendor_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut rooms = self.rooms.lock().unwrap();
        let entry = rooms
            .entry(consumer_id.to_string())
            .or_insert_with(|| (HashSet::new(), Instant::now() + ttl));
        entry.0.insert(vendor_id.to_string());
        entry.1 = Instant::now() + ttl;
        Ok(())
    }

    async fn remove_room(
        &self,
        consumer_id: &str,
        vendor_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        if let Some(entry) = self.rooms.lock().unwrap().get_mut(consumer_id) {
            entry.0.remove(vendor_id);
            entry.1 = Instant::now() + ttl;
        }
        Ok(())
    }

    async fn clear_rooms(&self, consumer_id: &str) -> Result<(), StoreError> {
        self.rooms.lock().unwrap().remove(consumer_id);
        Ok(())
    }
}

/// 记录所有发布的内存总线，测试断言事件用
#[derive(Default)]
pub struct MemoryBus {
    published: Mutex<Vec<(String, Bytes)>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().unwrap().clone()
    }

    pub fn count_for(&self, subject: &str) -> usize {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == subject)
            .count()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), RelayError> {
        self.published
            .lock()
            .unwrap()
            .push((subject.to_string(), payload));
        Ok(())
    }

    async fn publish_durable(&self, subject: &str, payload: Bytes) -> Result<(), RelayError> {
        self.publish(subject, payload).await
    }
}
