//! Capacity Tracker
//!
//! Keeps this node's advertised local capacity in step with the volumes pinned
//! to it: a volume appearing takes its size away, a deleted volume with the
//! Delete reclaim policy gives it back. Updates and resyncs change nothing.

use super::retry::{retry_on_conflict, RetryPolicy};
use crate::cluster::{EventHandler, ResourceEvent};
use crate::domain::ports::ClusterClientRef;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::resources::{NodeExt, ReclaimPolicy, VolumeExt};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adjustment {
    Decrement(u64),
    Increment(u64),
}

impl Adjustment {
    fn direction(&self) -> &'static str {
        match self {
            Adjustment::Decrement(_) => "decrement",
            Adjustment::Increment(_) => "increment",
        }
    }
}

/// Reconciles advertised capacity from volume lifecycle events
pub struct CapacityTracker {
    cluster: ClusterClientRef,
    node_name: String,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl CapacityTracker {
    pub fn new(cluster: ClusterClientRef, node_name: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            cluster,
            node_name: node_name.into(),
            retry: RetryPolicy::default(),
            metrics,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Publish the measured free space as the starting capacity
    pub async fn initialize(&self, available: u64) -> Result<()> {
        retry_on_conflict(&self.retry, "initialize capacity", || async {
            let mut node = self.cluster.get_node(&self.node_name).await?;
            node.set_advertised_capacity(available);
            self.cluster.replace_node_status(&node).await
        })
        .await?;

        info!(node = %self.node_name, available, "Initialized advertised capacity");
        Ok(())
    }

    /// Read, adjust and write back the advertised capacity
    async fn adjust(&self, adjustment: Adjustment) -> Result<u64> {
        let updated = retry_on_conflict(&self.retry, "adjust capacity", || async {
            let mut node = self.cluster.get_node(&self.node_name).await?;
            let current = node.advertised_capacity().ok_or_else(|| Error::MissingCapacity {
                node: self.node_name.clone(),
            })?;

            let updated = match adjustment {
                Adjustment::Decrement(bytes) => {
                    if bytes > current {
                        warn!(
                            node = %self.node_name,
                            current,
                            bytes,
                            "Volume larger than advertised capacity, clamping at zero"
                        );
                    }
                    current.saturating_sub(bytes)
                }
                Adjustment::Increment(bytes) => current.saturating_add(bytes),
            };

            node.set_advertised_capacity(updated);
            self.cluster.replace_node_status(&node).await?;
            Ok(updated)
        })
        .await?;

        self.metrics.record_capacity_adjustment(adjustment.direction());
        Ok(updated)
    }

    async fn apply(&self, volume: &PersistentVolume, adjustment: Adjustment) -> Result<()> {
        match self.adjust(adjustment).await {
            Ok(capacity) => {
                info!(
                    volume = %volume.name_any(),
                    node = %self.node_name,
                    direction = adjustment.direction(),
                    capacity,
                    "Adjusted advertised capacity"
                );
                Ok(())
            }
            Err(Error::MissingCapacity { node }) => {
                warn!(volume = %volume.name_any(), %node, "No advertised capacity to adjust, skipping");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// A volume pinned to this node appeared
    pub async fn on_volume_added(&self, volume: &PersistentVolume) -> Result<()> {
        if !volume.is_pinned_to(&self.node_name) {
            return Ok(());
        }
        let bytes = volume.capacity_bytes()?;
        self.apply(volume, Adjustment::Decrement(bytes)).await
    }

    /// A volume pinned to this node was deleted
    pub async fn on_volume_deleted(&self, volume: &PersistentVolume) -> Result<()> {
        if !volume.is_pinned_to(&self.node_name) {
            return Ok(());
        }
        if volume.reclaim_policy() != ReclaimPolicy::Delete {
            debug!(volume = %volume.name_any(), "Retained volume, capacity unchanged");
            return Ok(());
        }
        let bytes = volume.capacity_bytes()?;
        self.apply(volume, Adjustment::Increment(bytes)).await
    }
}

#[async_trait]
impl EventHandler<PersistentVolume> for CapacityTracker {
    async fn handle(&self, event: ResourceEvent<PersistentVolume>) -> Result<()> {
        match event {
            ResourceEvent::Added(volume) => self.on_volume_added(&volume).await,
            ResourceEvent::Deleted(volume) => self.on_volume_deleted(&volume).await,
            ResourceEvent::Updated { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{node, volume, FakeCluster};
    use assert_matches::assert_matches;

    const GI: u64 = 1 << 30;

    fn tracker(cluster: Arc<FakeCluster>) -> (CapacityTracker, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let t = CapacityTracker::new(cluster, "worker-1", metrics.clone())
            .with_retry(RetryPolicy::immediate());
        (t, metrics)
    }

    fn cluster_with_capacity(capacity: Option<u64>) -> Arc<FakeCluster> {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_node(node("worker-1", capacity));
        cluster
    }

    #[tokio::test]
    async fn test_decrement_then_increment_restores() {
        let cluster = cluster_with_capacity(Some(100 * GI));
        let (t, metrics) = tracker(cluster.clone());
        let pv = volume("local-pv-1", "worker-1", "Delete", "20Gi", "/mnt/a");

        t.handle(ResourceEvent::Added(pv.clone())).await.unwrap();
        assert_eq!(cluster.capacity_of("worker-1"), Some(80 * GI));

        t.handle(ResourceEvent::Deleted(pv)).await.unwrap();
        assert_eq!(cluster.capacity_of("worker-1"), Some(100 * GI));
        assert_eq!(metrics.count("capacity_adjustments", "decrement"), 1);
        assert_eq!(metrics.count("capacity_adjustments", "increment"), 1);
    }

    #[tokio::test]
    async fn test_retained_volume_keeps_capacity() {
        let cluster = cluster_with_capacity(Some(100 * GI));
        let (t, _) = tracker(cluster.clone());
        let pv = volume("local-pv-1", "worker-1", "Retain", "20Gi", "/mnt/a");

        t.handle(ResourceEvent::Added(pv.clone())).await.unwrap();
        t.handle(ResourceEvent::Deleted(pv)).await.unwrap();
        assert_eq!(cluster.capacity_of("worker-1"), Some(80 * GI));
    }

    #[tokio::test]
    async fn test_updates_and_resyncs_are_ignored() {
        let cluster = cluster_with_capacity(Some(100 * GI));
        let (t, _) = tracker(cluster.clone());
        let pv = volume("local-pv-1", "worker-1", "Delete", "20Gi", "/mnt/a");

        t.handle(ResourceEvent::Updated { old: pv.clone(), new: pv }).await.unwrap();
        assert_eq!(cluster.capacity_of("worker-1"), Some(100 * GI));
        assert_eq!(cluster.call_count("replace_node_status"), 0);
    }

    #[tokio::test]
    async fn test_other_nodes_ignored() {
        let cluster = cluster_with_capacity(Some(100 * GI));
        let (t, _) = tracker(cluster.clone());

        // Prefix of our node name must not match
        let pv = volume("local-pv-1", "worker-10", "Delete", "20Gi", "/mnt/a");
        t.handle(ResourceEvent::Added(pv)).await.unwrap();
        assert_eq!(cluster.capacity_of("worker-1"), Some(100 * GI));
    }

    #[tokio::test]
    async fn test_missing_capacity_is_skipped() {
        let cluster = cluster_with_capacity(None);
        let (t, _) = tracker(cluster.clone());
        let pv = volume("local-pv-1", "worker-1", "Delete", "20Gi", "/mnt/a");

        t.handle(ResourceEvent::Added(pv)).await.unwrap();
        assert_eq!(cluster.capacity_of("worker-1"), None);
        assert_eq!(cluster.call_count("replace_node_status"), 0);
    }

    #[tokio::test]
    async fn test_decrement_saturates_at_zero() {
        let cluster = cluster_with_capacity(Some(5 * GI));
        let (t, _) = tracker(cluster.clone());
        let pv = volume("local-pv-1", "worker-1", "Delete", "20Gi", "/mnt/a");

        t.handle(ResourceEvent::Added(pv)).await.unwrap();
        assert_eq!(cluster.capacity_of("worker-1"), Some(0));
    }

    #[tokio::test]
    async fn test_conflicts_reread_and_retry() {
        let cluster = cluster_with_capacity(Some(100 * GI));
        let (t, _) = tracker(cluster.clone());
        let pv = volume("local-pv-1", "worker-1", "Delete", "10Gi", "/mnt/a");

        cluster.inject_conflicts(2);
        t.handle(ResourceEvent::Added(pv)).await.unwrap();
        assert_eq!(cluster.capacity_of("worker-1"), Some(90 * GI));
        assert_eq!(cluster.call_count("replace_node_status"), 3);
        assert_eq!(cluster.call_count("get_node"), 3);
    }

    #[tokio::test]
    async fn test_transient_errors_surface() {
        let cluster = cluster_with_capacity(Some(100 * GI));
        let (t, _) = tracker(cluster.clone());
        cluster.fail_operation("get_node");

        let pv = volume("local-pv-1", "worker-1", "Delete", "10Gi", "/mnt/a");
        let result = t.handle(ResourceEvent::Added(pv)).await;
        assert_matches!(result, Err(e) if e.is_transient());
    }

    #[tokio::test]
    async fn test_initialize_overwrites_capacity() {
        let cluster = cluster_with_capacity(None);
        let (t, _) = tracker(cluster.clone());

        t.initialize(42 * GI).await.unwrap();
        assert_eq!(cluster.capacity_of("worker-1"), Some(42 * GI));
    }
}
