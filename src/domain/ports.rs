//! Domain Ports - Core trait definitions for the provisioner
//!
//! These traits define the boundaries between the provisioning logic and
//! external systems: the cluster object store and the host's quota and mount
//! facilities. Adapters implement these traits to provide concrete
//! functionality.

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// Cluster Client Port
// =============================================================================

/// Port for object store operations
///
/// Writes submit the object as read, including its resourceVersion, and fail
/// with [`crate::Error::Conflict`] if the stored object moved on.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List nodes matching a label selector (`k=v,k2=v2`; empty matches all)
    async fn list_nodes(&self, selector: &str) -> Result<Vec<Node>>;

    /// Get a node by name
    async fn get_node(&self, name: &str) -> Result<Node>;

    /// Replace a node's status
    async fn replace_node_status(&self, node: &Node) -> Result<Node>;

    /// Get a storage class by name
    async fn get_storage_class(&self, name: &str) -> Result<StorageClass>;

    /// Get a claim, `None` if it no longer exists
    async fn get_claim(&self, namespace: &str, name: &str)
        -> Result<Option<PersistentVolumeClaim>>;

    /// Replace a claim
    async fn replace_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim>;

    /// Get a volume, `None` if it no longer exists
    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>>;
}

// =============================================================================
// Quota Manager Port
// =============================================================================

/// Port for filesystem project quota operations
///
/// Projects are addressed by name; the name → id and id → path mapping lives in
/// the quota ledgers, which must be written before a project is created.
#[async_trait]
pub trait QuotaManager: Send + Sync {
    /// Register the project's directory tree with the quota subsystem
    async fn create_project(&self, project: &str) -> Result<()>;

    /// Set the hard block limit of a project in bytes
    async fn set_hard_limit(&self, project: &str, bytes: u64) -> Result<()>;

    /// Reset the limits of a project and remove its registration
    async fn clear_project(&self, project: &str) -> Result<()>;
}

// =============================================================================
// Mount Manager Port
// =============================================================================

/// Port for bind mount operations
pub trait MountManager: Send + Sync {
    /// Bind-mount a directory onto itself
    fn bind_mount(&self, path: &Path) -> Result<()>;

    /// Unmount a path
    fn unmount(&self, path: &Path) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterClientRef = Arc<dyn ClusterClient>;
pub type QuotaManagerRef = Arc<dyn QuotaManager>;
pub type MountManagerRef = Arc<dyn MountManager>;
