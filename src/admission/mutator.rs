//! Admission Mutator
//!
//! Intercepts claim creation, assigns a host node and a deterministic volume
//! identity, and answers with a JSON-Patch.

use super::identity::{directory_name, volume_name};
use super::review::{
    escape_pointer, AdmissionRequest, AdmissionResponse, AdmissionReview, PatchOperation,
};
use super::selector::{build_selector, DefaultSelectors};
use super::strategy::NodeSelectorRef;
use crate::domain::ports::ClusterClientRef;
use crate::error::{Error, Result};
use crate::metrics::{Metrics, REVIEW_DENIED, REVIEW_MUTATED, REVIEW_PASSED};
use crate::resources::{ClaimExt, LOCAL_PROVISIONER, NODE_NAME_ANNOTATION, PV_DIR_NAME_ANNOTATION};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Assigns nodes and volume identities to local claims
pub struct AdmissionMutator {
    cluster: ClusterClientRef,
    strategy: NodeSelectorRef,
    node_label: Option<String>,
    defaults: DefaultSelectors,
    metrics: Arc<Metrics>,
}

impl AdmissionMutator {
    pub fn new(
        cluster: ClusterClientRef,
        strategy: NodeSelectorRef,
        node_label: Option<String>,
        defaults: DefaultSelectors,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cluster,
            strategy,
            node_label,
            defaults,
            metrics,
        }
    }

    /// Counters updated by reviews
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Answer one review; never fails, errors become denials
    pub async fn review(&self, review: AdmissionReview) -> AdmissionReview {
        let Some(request) = review.request else {
            self.metrics.record_review(REVIEW_DENIED);
            return AdmissionReview::from_response(AdmissionResponse::deny(
                "",
                "admission review carries no request",
            ));
        };

        let uid = request.uid.clone();
        let response = match self.mutate(&request).await {
            Ok(operations) if operations.is_empty() => {
                self.metrics.record_review(REVIEW_PASSED);
                AdmissionResponse::allow(uid)
            }
            Ok(operations) => match AdmissionResponse::allow(uid.clone()).with_patch(&operations) {
                Ok(response) => {
                    self.metrics.record_review(REVIEW_MUTATED);
                    response
                }
                Err(e) => {
                    self.metrics.record_review(REVIEW_DENIED);
                    AdmissionResponse::deny(uid, format!("cannot encode patch: {}", e))
                }
            },
            Err(e) => {
                warn!(uid = %uid, "Denying claim: {}", e);
                self.metrics.record_review(REVIEW_DENIED);
                AdmissionResponse::deny(uid, e.to_string())
            }
        };

        AdmissionReview::from_response(response)
    }

    /// Compute the patch for one request
    async fn mutate(&self, request: &AdmissionRequest) -> Result<Vec<PatchOperation>> {
        let object = match &request.object {
            Some(Value::Object(map)) if !map.is_empty() => Value::Object(map.clone()),
            _ => return Ok(Vec::new()),
        };
        let claim: PersistentVolumeClaim = serde_json::from_value(object)?;

        let Some(storage_class) = claim.storage_class() else {
            return Ok(Vec::new());
        };
        let class = self.cluster.get_storage_class(storage_class).await?;
        if class.provisioner != LOCAL_PROVISIONER {
            debug!(storage_class, provisioner = %class.provisioner, "Not a local class, passing through");
            return Ok(Vec::new());
        }

        let namespace = claim
            .namespace()
            .or_else(|| request.namespace.clone())
            .unwrap_or_default();
        let name = claim
            .metadata
            .name
            .clone()
            .or_else(|| request.name.clone())
            .or_else(|| claim.metadata.generate_name.clone())
            .unwrap_or_default();

        let mut added = Map::new();
        let node_name = match claim.assigned_node() {
            Some(node) => node.to_string(),
            None => {
                let node = self.assign_node(&claim).await?;
                added.insert(NODE_NAME_ANNOTATION.to_string(), json!(node));
                node
            }
        };

        let directory = match claim.pv_dir_name() {
            Some(dir) => dir.to_string(),
            None => {
                let dir = directory_name(&namespace, &name);
                added.insert(PV_DIR_NAME_ANNOTATION.to_string(), json!(dir));
                dir
            }
        };
        let volume = volume_name(&directory, &node_name, storage_class);

        info!(
            claim = %format!("{}/{}", namespace, name),
            node = %node_name,
            directory = %directory,
            volume = %volume,
            "Assigned local volume"
        );

        let mut operations = annotation_operations(&claim, added);
        operations.push(PatchOperation::add("/spec/volumeName", json!(volume)));
        Ok(operations)
    }

    /// Choose the host node for a claim without one
    async fn assign_node(&self, claim: &PersistentVolumeClaim) -> Result<String> {
        let (selector, source) = build_selector(claim, self.node_label.as_deref(), &self.defaults)?;
        let candidates = self.cluster.list_nodes(&selector).await?;
        debug!(%selector, %source, candidates = candidates.len(), "Queried candidate nodes");

        let node = match candidates.len() {
            0 => return Err(Error::NoMatchingNodes { selector }),
            1 => &candidates[0],
            _ => self.strategy.pick(&candidates)?,
        };
        Ok(node.name_any())
    }
}

/// Add annotations without replacing any that already exist
fn annotation_operations(
    claim: &PersistentVolumeClaim,
    added: Map<String, Value>,
) -> Vec<PatchOperation> {
    if added.is_empty() {
        return Vec::new();
    }
    if claim.metadata.annotations.is_none() {
        return vec![PatchOperation::add("/metadata/annotations", Value::Object(added))];
    }
    added
        .into_iter()
        .map(|(key, value)| {
            PatchOperation::add(format!("/metadata/annotations/{}", escape_pointer(&key)), value)
        })
        .collect()
}
