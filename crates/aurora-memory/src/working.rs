use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::types::DEFAULT_WORKING_TTL_SECS;

#[derive(Debug, Clone)]
struct WorkingEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// Per-project, TTL-bound key-value scratch store for intra-phase state
/// (spec §4.5 Tiers: "Working memory ... default 1 hour"). Expired entries
/// are evicted lazily on read/write, plus via an explicit `sweep`.
#[derive(Clone)]
pub struct WorkingMemory {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<(String, String), WorkingEntry>>>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::with_ttl(Duration::seconds(DEFAULT_WORKING_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn set(&self, project_id: &str, key: &str, value: Value) {
        let mut entries = self.entries.write().await;
        entries.insert(
            (project_id.to_string(), key.to_string()),
            WorkingEntry {
                value,
                expires_at: Utc::now() + self.ttl,
            },
        );
    }

    pub async fn get(&self, project_id: &str, key: &str) -> Option<Value> {
        let mut entries = self.entries.write().await;
        let k = (project_id.to_string(), key.to_string());
        match entries.get(&k) {
            Some(entry) if entry.expires_at > Utc::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(&k);
                None
            }
            None => None,
        }
    }

    pub async fn delete(&self, project_id: &str, key: &str) {
        self.entries
            .write()
            .await
            .remove(&(project_id.to_string(), key.to_string()));
    }

    /// Evicts every entry whose TTL has passed. Intended to run on a timer
    /// alongside the health monitor's heartbeat loop.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_round_trips_within_ttl() {
        let wm = WorkingMemory::new();
        wm.set("proj_1", "scratch", json!({"draft": "v1"})).await;
        assert_eq!(wm.get("proj_1", "scratch").await, Some(json!({"draft": "v1"})));
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let wm = WorkingMemory::with_ttl(Duration::milliseconds(-1));
        wm.set("proj_1", "scratch", json!("stale")).await;
        assert_eq!(wm.get("proj_1", "scratch").await, None);
    }

    #[tokio::test]
    async fn sweep_evicts_expired_entries_and_reports_count() {
        let wm = WorkingMemory::with_ttl(Duration::milliseconds(-1));
        wm.set("proj_1", "a", json!(1)).await;
        wm.set("proj_1", "b", json!(2)).await;
        assert_eq!(wm.sweep().await, 2);
    }
}
