//! In-memory fakes of the cluster, quota and mount ports

use crate::domain::ports::{ClusterClient, MountManager, QuotaManager};
use crate::error::{Error, Result};
use crate::resources::{NodeExt, LV_CAPACITY};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::ResourceExt;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Object Builders
// =============================================================================

pub fn node(name: &str, capacity: Option<u64>) -> Node {
    node_with_labels(name, &[], capacity)
}

pub fn node_with_labels(name: &str, labels: &[(&str, &str)], capacity: Option<u64>) -> Node {
    let labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut node: Node = serde_json::from_value(json!({
        "metadata": { "name": name, "labels": labels, "resourceVersion": "1" },
        "status": { "capacity": { "cpu": "4" } }
    }))
    .unwrap();
    if let Some(bytes) = capacity {
        node.set_advertised_capacity(bytes);
    }
    node
}

pub fn storage_class(name: &str, provisioner: &str) -> StorageClass {
    serde_json::from_value(json!({
        "metadata": { "name": name },
        "provisioner": provisioner
    }))
    .unwrap()
}

/// A claim in the given phase; `annotations` is a JSON object
pub fn claim(
    namespace: &str,
    name: &str,
    storage_class: &str,
    request: &str,
    phase: &str,
    annotations: serde_json::Value,
) -> PersistentVolumeClaim {
    serde_json::from_value(json!({
        "metadata": {
            "name": name,
            "namespace": namespace,
            "resourceVersion": "1",
            "annotations": annotations
        },
        "spec": {
            "storageClassName": storage_class,
            "resources": { "requests": { "storage": request } }
        },
        "status": { "phase": phase }
    }))
    .unwrap()
}

/// A local volume pinned to `node`
pub fn volume(name: &str, node: &str, policy: &str, capacity: &str, path: &str) -> PersistentVolume {
    serde_json::from_value(json!({
        "metadata": { "name": name },
        "spec": {
            "capacity": { "storage": capacity },
            "persistentVolumeReclaimPolicy": policy,
            "local": { "path": path },
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

// =============================================================================
// Fake Cluster
// =============================================================================

/// In-memory object store enforcing resourceVersion on writes
#[derive(Default)]
pub struct FakeCluster {
    nodes: Mutex<BTreeMap<String, Node>>,
    classes: Mutex<HashMap<String, StorageClass>>,
    claims: Mutex<BTreeMap<String, PersistentVolumeClaim>>,
    volumes: Mutex<HashMap<String, PersistentVolume>>,
    calls: Mutex<Vec<String>>,
    /// Writes that fail with a conflict before the next one succeeds
    pending_conflicts: AtomicU64,
    /// Operation name that fails with a transient error
    failing: Mutex<Option<String>>,
    versions: AtomicU64,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            versions: AtomicU64::new(100),
            ..Default::default()
        }
    }

    pub fn add_node(&self, node: Node) {
        self.nodes.lock().insert(node.name_any(), node);
    }

    pub fn add_storage_class(&self, class: StorageClass) {
        self.classes.lock().insert(class.name_any(), class);
    }

    pub fn add_claim(&self, claim: PersistentVolumeClaim) {
        let key = format!("{}/{}", claim.namespace().unwrap_or_default(), claim.name_any());
        self.claims.lock().insert(key, claim);
    }

    pub fn add_volume(&self, volume: PersistentVolume) {
        self.volumes.lock().insert(volume.name_any(), volume);
    }

    pub fn node(&self, name: &str) -> Option<Node> {
        self.nodes.lock().get(name).cloned()
    }

    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.claims.lock().get(&format!("{}/{}", namespace, name)).cloned()
    }

    /// Advertised capacity currently stored for a node
    pub fn capacity_of(&self, name: &str) -> Option<u64> {
        self.node(name).and_then(|n| n.advertised_capacity())
    }

    /// Make the next `n` writes fail with a conflict
    pub fn inject_conflicts(&self, n: u64) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Make every call of `operation` fail
    pub fn fail_operation(&self, operation: &str) {
        *self.failing.lock() = Some(operation.to_string());
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == operation).count()
    }

    fn record(&self, operation: &str) -> Result<()> {
        self.calls.lock().push(operation.to_string());
        if self.failing.lock().as_deref() == Some(operation) {
            return Err(Error::Watch(format!("injected failure in {}", operation)));
        }
        Ok(())
    }

    fn take_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn next_version(&self) -> String {
        self.versions.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

fn matches_selector(node: &Node, selector: &str) -> bool {
    let labels = node.labels();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term.trim()),
        })
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_nodes(&self, selector: &str) -> Result<Vec<Node>> {
        self.record("list_nodes")?;
        Ok(self
            .nodes
            .lock()
            .values()
            .filter(|n| matches_selector(n, selector))
            .cloned()
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.record("get_node")?;
        self.node(name).ok_or_else(|| Error::ResourceNotFound {
            kind: "Node".to_string(),
            name: name.to_string(),
        })
    }

    async fn replace_node_status(&self, node: &Node) -> Result<Node> {
        self.record("replace_node_status")?;
        let name = node.name_any();
        let conflict = || Error::Conflict {
            kind: "Node".to_string(),
            name: name.clone(),
        };
        if self.take_conflict() {
            // A concurrent writer moved the object on
            if let Some(stored) = self.nodes.lock().get_mut(&name) {
                stored.metadata.resource_version = Some(self.next_version());
            }
            return Err(conflict());
        }

        let mut nodes = self.nodes.lock();
        let stored = nodes.get_mut(&name).ok_or_else(|| Error::ResourceNotFound {
            kind: "Node".to_string(),
            name: name.clone(),
        })?;
        if stored.metadata.resource_version != node.metadata.resource_version {
            return Err(conflict());
        }

        let capacity = node
            .status
            .as_ref()
            .and_then(|s| s.capacity.as_ref())
            .and_then(|c| c.get(LV_CAPACITY))
            .cloned();
        if let Some(quantity) = capacity {
            stored
                .status
                .get_or_insert_with(Default::default)
                .capacity
                .get_or_insert_with(Default::default)
                .insert(LV_CAPACITY.to_string(), quantity);
        }
        stored.metadata.resource_version = Some(self.next_version());
        Ok(stored.clone())
    }

    async fn get_storage_class(&self, name: &str) -> Result<StorageClass> {
        self.record("get_storage_class")?;
        self.classes
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: "StorageClass".to_string(),
                name: name.to_string(),
            })
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        self.record("get_claim")?;
        Ok(self.claim(namespace, name))
    }

    async fn replace_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        self.record("replace_claim")?;
        let key = format!("{}/{}", claim.namespace().unwrap_or_default(), claim.name_any());
        let conflict = || Error::Conflict {
            kind: "PersistentVolumeClaim".to_string(),
            name: key.clone(),
        };
        if self.take_conflict() {
            if let Some(stored) = self.claims.lock().get_mut(&key) {
                stored.metadata.resource_version = Some(self.next_version());
            }
            return Err(conflict());
        }

        let mut claims = self.claims.lock();
        let stored = claims.get_mut(&key).ok_or_else(|| Error::ResourceNotFound {
            kind: "PersistentVolumeClaim".to_string(),
            name: key.clone(),
        })?;
        if stored.metadata.resource_version != claim.metadata.resource_version {
            return Err(conflict());
        }
        let mut updated = claim.clone();
        updated.metadata.resource_version = Some(self.next_version());
        *stored = updated.clone();
        Ok(updated)
    }

    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>> {
        self.record("get_volume")?;
        Ok(self.volumes.lock().get(name).cloned())
    }
}

// =============================================================================
// Host Fakes
// =============================================================================

/// Records quota commands instead of running them
#[derive(Default)]
pub struct RecordingQuota {
    pub commands: Mutex<Vec<String>>,
    /// Projects and their hard limits
    pub limits: Mutex<BTreeMap<String, u64>>,
    fail_on: Mutex<Option<String>>,
}

impl RecordingQuota {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every command starting with `prefix`
    pub fn fail_on(&self, prefix: &str) {
        *self.fail_on.lock() = Some(prefix.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    fn run(&self, command: String) -> Result<()> {
        let failing = self
            .fail_on
            .lock()
            .as_ref()
            .is_some_and(|prefix| command.starts_with(prefix.as_str()));
        self.commands.lock().push(command.clone());
        if failing {
            return Err(Error::QuotaCommand {
                command,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl QuotaManager for RecordingQuota {
    async fn create_project(&self, project: &str) -> Result<()> {
        self.run(format!("project -s {}", project))?;
        self.limits.lock().insert(project.to_string(), 0);
        Ok(())
    }

    async fn set_hard_limit(&self, project: &str, bytes: u64) -> Result<()> {
        self.run(format!("limit -p bhard={} {}", bytes, project))?;
        self.limits.lock().insert(project.to_string(), bytes);
        Ok(())
    }

    async fn clear_project(&self, project: &str) -> Result<()> {
        self.run(format!("project -C {}", project))?;
        self.limits.lock().remove(project);
        Ok(())
    }
}

/// Tracks bind mounts in memory
#[derive(Default)]
pub struct RecordingMounter {
    pub mounted: Mutex<Vec<PathBuf>>,
    pub operations: Mutex<Vec<String>>,
    pub fail_mount: Mutex<bool>,
}

impl RecordingMounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_mounts(&self) {
        *self.fail_mount.lock() = true;
    }

    pub fn operation_count(&self) -> usize {
        self.operations.lock().len()
    }
}

impl MountManager for RecordingMounter {
    fn bind_mount(&self, path: &Path) -> Result<()> {
        self.operations.lock().push(format!("mount {}", path.display()));
        if *self.fail_mount.lock() {
            return Err(Error::Mount {
                path: path.display().to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.mounted.lock().push(path.to_path_buf());
        Ok(())
    }

    fn unmount(&self, path: &Path) -> Result<()> {
        self.operations.lock().push(format!("unmount {}", path.display()));
        let mut mounted = self.mounted.lock();
        match mounted.iter().position(|p| p == path) {
            Some(i) => {
                mounted.remove(i);
                Ok(())
            }
            None => Err(Error::Mount {
                path: path.display().to_string(),
                reason: "not mounted".to_string(),
            }),
        }
    }
}
