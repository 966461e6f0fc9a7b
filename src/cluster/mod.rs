//! Cluster Adapters
//!
//! Provides the kube-backed implementation of the [`ClusterClient`] port and
//! the typed watch loops that feed the reconcilers.

pub mod watch;

pub use watch::*;

use crate::domain::ports::ClusterClient;
use crate::error::{Error, Result};
use crate::resources::{bytes_to_quantity, LV_CAPACITY};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Map API status codes onto the provisioner's error taxonomy
fn classify(err: kube::Error, kind: &str, name: &str) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => Error::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 404 => Error::ResourceNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        other => Error::Kube(other),
    }
}

/// Real cluster client implementation
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new KubeClusterClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Underlying kube client, used to build watch APIs
    pub fn client(&self) -> Client {
        self.client.clone()
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_nodes(&self, selector: &str) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }
        let nodes = api.list(&params).await?;
        debug!(selector, count = nodes.items.len(), "Listed nodes");
        Ok(nodes.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        let api: Api<Node> = Api::all(self.client.clone());
        api.get(name).await.map_err(|e| classify(e, "Node", name))
    }

    async fn replace_node_status(&self, node: &Node) -> Result<Node> {
        let name = node.name_any();
        let api: Api<Node> = Api::all(self.client.clone());

        // Only our capacity entry is merged; the resourceVersion makes the
        // patch conditional on the node not having changed since it was read.
        let capacity = node
            .status
            .as_ref()
            .and_then(|s| s.capacity.as_ref())
            .and_then(|c| c.get(LV_CAPACITY))
            .cloned()
            .unwrap_or_else(|| bytes_to_quantity(0));
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": node.resource_version() },
            "status": { "capacity": { LV_CAPACITY: capacity } }
        });

        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(e, "Node", &name))
    }

    async fn get_storage_class(&self, name: &str) -> Result<StorageClass> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| classify(e, "StorageClass", name))
    }

    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PersistentVolumeClaim>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace_claim(&self, claim: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim> {
        let name = claim.name_any();
        let namespace = claim.namespace().unwrap_or_default();
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&name, &PostParams::default(), claim)
            .await
            .map_err(|e| classify(e, "PersistentVolumeClaim", &format!("{}/{}", namespace, name)))
    }

    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }
}
