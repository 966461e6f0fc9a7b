//! Volume request (PersistentVolumeClaim) accessors

use super::quantity::quantity_to_bytes;
use super::{NODE_NAME_ANNOTATION, NODE_SELECTOR_ANNOTATION, PV_DIR_NAME_ANNOTATION, STORAGE_RESOURCE};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;

/// Lifecycle phase of a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimPhase {
    Pending,
    Bound,
    Lost,
}

impl ClaimPhase {
    /// Parse the phase string reported in claim status
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(ClaimPhase::Pending),
            "Bound" => Some(ClaimPhase::Bound),
            "Lost" => Some(ClaimPhase::Lost),
            _ => None,
        }
    }
}

impl std::fmt::Display for ClaimPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimPhase::Pending => write!(f, "Pending"),
            ClaimPhase::Bound => write!(f, "Bound"),
            ClaimPhase::Lost => write!(f, "Lost"),
        }
    }
}

/// Typed read access to the fields the provisioner cares about
pub trait ClaimExt {
    /// `namespace/name` for logging
    fn claim_key(&self) -> String;
    /// Storage class referenced by the claim
    fn storage_class(&self) -> Option<&str>;
    /// Phase, where a claim without status counts as pending
    fn phase(&self) -> ClaimPhase;
    /// Requested storage in bytes
    fn requested_bytes(&self) -> Result<u64>;
    /// Node assigned at admission
    fn assigned_node(&self) -> Option<&str>;
    /// Host directory name assigned at admission
    fn pv_dir_name(&self) -> Option<&str>;
    /// Raw explicit node selector annotation
    fn node_selector(&self) -> Option<&str>;
    /// Name of the volume the claim targets
    fn volume_name(&self) -> Option<&str>;
}

impl ClaimExt for PersistentVolumeClaim {
    fn claim_key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    fn storage_class(&self) -> Option<&str> {
        self.spec
            .as_ref()
            .and_then(|s| s.storage_class_name.as_deref())
            .filter(|s| !s.is_empty())
    }

    fn phase(&self) -> ClaimPhase {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .and_then(ClaimPhase::parse)
            .unwrap_or(ClaimPhase::Pending)
    }

    fn requested_bytes(&self) -> Result<u64> {
        let request = self
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .and_then(|r| r.get(STORAGE_RESOURCE))
            .ok_or_else(|| {
                Error::CapacityParse(format!("claim {} has no storage request", self.claim_key()))
            })?;
        quantity_to_bytes(request)
    }

    fn assigned_node(&self) -> Option<&str> {
        annotation(self, NODE_NAME_ANNOTATION)
    }

    fn pv_dir_name(&self) -> Option<&str> {
        annotation(self, PV_DIR_NAME_ANNOTATION)
    }

    fn node_selector(&self) -> Option<&str> {
        annotation(self, NODE_SELECTOR_ANNOTATION)
    }

    fn volume_name(&self) -> Option<&str> {
        self.spec
            .as_ref()
            .and_then(|s| s.volume_name.as_deref())
            .filter(|s| !s.is_empty())
    }
}

fn annotation<'a>(claim: &'a PersistentVolumeClaim, key: &str) -> Option<&'a str> {
    claim
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}
