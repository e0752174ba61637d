//! Registry of connected bridges

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

/// Connected bridge bookkeeping
#[derive(Debug, Clone, Serialize)]
pub struct BridgeInfo {
    pub bridge_id: Uuid,
    pub connected_at: u64,
    pub remote: Option<String>,
}

/// Registry of all connected bridges
pub struct BridgeRegistry {
    bridges: DashMap<Uuid, BridgeInfo>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self {
            bridges: DashMap::new(),
        }
    }

    pub fn insert(&self, info: BridgeInfo) {
        self.bridges.insert(info.bridge_id, info);
    }

    pub fn remove(&self, id: &Uuid) -> Option<BridgeInfo> {
        self.bridges.remove(id).map(|(_, info)| info)
    }

    pub fn connected(&self) -> usize {
        self.bridges.len()
    }

    pub fn list(&self) -> Vec<BridgeInfo> {
        let mut bridges: Vec<BridgeInfo> =
            self.bridges.iter().map(|entry| entry.value().clone()).collect();
        bridges.sort_by_key(|b| b.connected_at);
        bridges
    }
}

impl Default for BridgeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
