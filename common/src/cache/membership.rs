// Cached view of the live nodes of a namespace
//
// Membership is observational: nothing in the firing path depends on it, so
// a stale list only affects what callers such as operators see.

use crate::errors::DatabaseError;
use crate::models::NodeRecord;
use crate::store::Store;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::instrument;

#[derive(Default)]
pub struct ClusterMembershipCache {
    nodes: RwLock<Vec<NodeRecord>>,
    refreshed_at: RwLock<Option<DateTime<Utc>>>,
}

impl ClusterMembershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached list with the nodes available at `now`
    #[instrument(skip(self, store))]
    pub async fn reload(
        &self,
        store: &dyn Store,
        namespace: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let nodes = store.list_available_nodes(namespace, now).await?;
        let count = nodes.len();
        self.replace(nodes, now).await;
        tracing::debug!(available_nodes = count, "Cluster membership reloaded");
        Ok(count)
    }

    pub async fn replace(&self, nodes: Vec<NodeRecord>, now: DateTime<Utc>) {
        *self.nodes.write().await = nodes;
        *self.refreshed_at.write().await = Some(now);
    }

    pub async fn nodes(&self) -> Vec<NodeRecord> {
        self.nodes.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }

    pub async fn contains(&self, instance_name: &str) -> bool {
        self.nodes
            .read()
            .await
            .iter()
            .any(|n| n.instance_name == instance_name)
    }

    pub async fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        *self.refreshed_at.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;

    #[tokio::test]
    async fn test_reload_keeps_only_available_nodes() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .upsert_node("default", "alive", 1_000, None, None, now)
            .await
            .unwrap();
        store
            .upsert_node("default", "dead", 1_000, None, None, now - Duration::seconds(10))
            .await
            .unwrap();
        store
            .upsert_node("other", "elsewhere", 1_000, None, None, now)
            .await
            .unwrap();

        let cache = ClusterMembershipCache::new();
        let count = cache.reload(&store, "default", now).await.unwrap();

        assert_eq!(count, 1);
        assert!(cache.contains("alive").await);
        assert!(!cache.contains("dead").await);
        assert_eq!(cache.refreshed_at().await, Some(now));
    }
}
