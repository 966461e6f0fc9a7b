//! Materialized volume (PersistentVolume) accessors

use super::quantity::quantity_to_bytes;
use super::STORAGE_RESOURCE;
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::ResourceExt;
use std::path::Path;

/// What happens to the host storage once the volume is released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimPolicy {
    Delete,
    Retain,
    Recycle,
}

impl ReclaimPolicy {
    /// Parse a reclaim policy; an absent policy defaults to Retain
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("Delete") => ReclaimPolicy::Delete,
            Some("Recycle") => ReclaimPolicy::Recycle,
            _ => ReclaimPolicy::Retain,
        }
    }
}

/// Typed read access to volume fields used for accounting and teardown
pub trait VolumeExt {
    /// Volume capacity in bytes
    fn capacity_bytes(&self) -> Result<u64>;
    /// Reclaim policy of the volume
    fn reclaim_policy(&self) -> ReclaimPolicy;
    /// Host path of a local volume
    fn local_path(&self) -> Option<&Path>;
    /// Textual form of the required node affinity
    fn affinity_text(&self) -> Option<String>;
    /// Whether the required node affinity names the given node
    fn is_pinned_to(&self, node_name: &str) -> bool;
}

impl VolumeExt for PersistentVolume {
    fn capacity_bytes(&self) -> Result<u64> {
        let capacity = self
            .spec
            .as_ref()
            .and_then(|s| s.capacity.as_ref())
            .and_then(|c| c.get(STORAGE_RESOURCE))
            .ok_or_else(|| {
                Error::CapacityParse(format!("volume {} has no storage capacity", self.name_any()))
            })?;
        quantity_to_bytes(capacity)
    }

    fn reclaim_policy(&self) -> ReclaimPolicy {
        ReclaimPolicy::parse(
            self.spec
                .as_ref()
                .and_then(|s| s.persistent_volume_reclaim_policy.as_deref()),
        )
    }

    fn local_path(&self) -> Option<&Path> {
        self.spec
            .as_ref()
            .and_then(|s| s.local.as_ref())
            .map(|l| Path::new(l.path.as_str()))
    }

    fn affinity_text(&self) -> Option<String> {
        let required = self
            .spec
            .as_ref()
            .and_then(|s| s.node_affinity.as_ref())
            .and_then(|a| a.required.as_ref())?;
        serde_json::to_string(required).ok()
    }

    fn is_pinned_to(&self, node_name: &str) -> bool {
        if node_name.is_empty() {
            return false;
        }
        // Match the quoted token so "worker-1" does not claim "worker-10"
        let token = format!("\"{}\"", node_name);
        self.affinity_text()
            .map(|text| text.contains(&token))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn volume(node: &str, policy: &str) -> PersistentVolume {
        serde_json::from_value(json!({
            "metadata": { "name": "local-pv-1a2b3c4d" },
            "spec": {
                "capacity": { "storage": "20Gi" },
                "persistentVolumeReclaimPolicy": policy,
                "local": { "path": "/mnt/local/apps_data-abcd1234" },
                "nodeAffinity": {
                    "required": {
                        "nodeSelectorTerms": [{
                            "matchExpressions": [{
                                "key": "kubernetes.io/hostname",
                                "operator": "In",
                                "values": [node]
                            }]
                        }]
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_volume_accessors() {
        let pv = volume("worker-1", "Delete");
        assert_eq!(pv.capacity_bytes().unwrap(), 20 * 1024 * 1024 * 1024);
        assert_eq!(pv.reclaim_policy(), ReclaimPolicy::Delete);
        assert_eq!(
            pv.local_path(),
            Some(Path::new("/mnt/local/apps_data-abcd1234"))
        );
        assert!(pv.affinity_text().unwrap().contains("worker-1"));
    }

    #[test]
    fn test_pinned_to_exact_node_only() {
        let pv = volume("worker-10", "Retain");
        assert!(pv.is_pinned_to("worker-10"));
        assert!(!pv.is_pinned_to("worker-1"));
        assert!(!pv.is_pinned_to(""));
        assert_eq!(pv.reclaim_policy(), ReclaimPolicy::Retain);
    }

    #[test]
    fn test_volume_without_affinity() {
        let pv: PersistentVolume = serde_json::from_value(json!({
            "metadata": { "name": "other" },
            "spec": {}
        }))
        .unwrap();
        assert!(!pv.is_pinned_to("worker-1"));
        assert_eq!(pv.reclaim_policy(), ReclaimPolicy::Retain);
        assert!(pv.capacity_bytes().is_err());
    }
}
