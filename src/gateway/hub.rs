use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;

use super::Outbound;

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// 本进程内的连接登记表：只持有 socket 发送端和房间扇出
/// 关系。身份、存活、成员记录都在共享存储里，这里丢了
/// 可以重建，网关实例依旧无状态。
#[derive(Default)]
pub struct ConnectionHub {
    conns: DashMap<String, OutboundSender>,
    // vendor_id -> 本进程内订阅它的连接
    rooms: DashMap<String, HashSet<String>>,
    conn_rooms: DashMap<String, HashSet<String>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: &str, sender: OutboundSender) {
        self.conns.insert(connection_id.to_string(), sender);
    }

    pub fn remove(&self, connection_id: &str) {
        self.leave_all(connection_id);
        self.conns.remove(connection_id);
    }

    pub fn join(&self, vendor_id: &str, connection_id: &str) {
        self.rooms
            .entry(vendor_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        self.conn_rooms
            .entry(connection_id.to_string())
            .or_default()
            .insert(vendor_id.to_string());
    }

    pub fn leave(&self, vendor_id: &str, connection_id: &str) {
        if let Some(mut members) = self.rooms.get_mut(vendor_id) {
            members.remove(connection_id);
        }
        if let Some(mut rooms) = self.conn_rooms.get_mut(connection_id) {
            rooms.remove(vendor_id);
        }
    }

    pub fn leave_all(&self, connection_id: &str) {
        if let Some((_, rooms)) = self.conn_rooms.remove(connection_id) {
            for vendor_id in rooms {
                if let Some(mut members) = self.rooms.get_mut(&vendor_id) {
                    members.remove(connection_id);
                }
            }
        }
    }

    /// 返回 false 表示连接已经不在本进程
    pub fn send_to(&self, connection_id: &str, frame: Outbound) -> bool {
        match self.conns.get(connection_id) {
            Some(sender) => sender.send(frame).is_ok(),
            None => false,
        }
    }

    /// 向订阅某商家的所有本地连接扇出，返回送达数
    pub fn broadcast_to_room(&self, vendor_id: &str, frame: &Outbound) -> usize {
        let Some(members) = self.rooms.get(vendor_id) else {
            return 0;
        };
        let mut delivered = 0;
        for connection_id in members.iter() {
            if self.send_to(connection_id, frame.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn room_size(&self, vendor_id: &str) -> usize {
        self.rooms.get(vendor_id).map(|m| m.len()).unwrap_or(0)
    }
}
