//! Node Selection Strategies
//!
//! Pure policies choosing one node out of a label-matched candidate set.

use crate::error::{Error, Result};
use crate::resources::NodeExt;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// =============================================================================
// Strategy Trait
// =============================================================================

/// A policy picking the node that hosts a new volume
pub trait NodeSelector: Send + Sync {
    /// Strategy name for logging
    fn name(&self) -> &'static str;

    /// Pick one node out of a non-empty candidate set
    fn pick<'a>(&self, candidates: &'a [Node]) -> Result<&'a Node>;
}

pub type NodeSelectorRef = Arc<dyn NodeSelector>;

/// Configured selection method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMethod {
    #[default]
    RoundRobin,
    Capacity,
}

impl FromStr for SelectionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "round robin" => Ok(SelectionMethod::RoundRobin),
            "capacity" => Ok(SelectionMethod::Capacity),
            other => Err(Error::Configuration(format!(
                "unknown node selector method {:?}, expected \"round robin\" or \"capacity\"",
                other
            ))),
        }
    }
}

impl std::fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionMethod::RoundRobin => write!(f, "round robin"),
            SelectionMethod::Capacity => write!(f, "capacity"),
        }
    }
}

impl SelectionMethod {
    /// Build the strategy; round robin keeps the node snapshot taken at startup
    pub fn build(self, snapshot: Vec<String>) -> NodeSelectorRef {
        match self {
            SelectionMethod::RoundRobin => Arc::new(RoundRobin::new(snapshot)),
            SelectionMethod::Capacity => Arc::new(CapacityAware),
        }
    }
}

fn require_candidates(candidates: &[Node]) -> Result<()> {
    if candidates.is_empty() {
        return Err(Error::NoMatchingNodes {
            selector: String::new(),
        });
    }
    Ok(())
}

// =============================================================================
// Round Robin
// =============================================================================

/// Rotates through candidates using one shared cursor
pub struct RoundRobin {
    snapshot: Vec<String>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    /// `snapshot` is the node list observed at startup
    pub fn new(snapshot: Vec<String>) -> Self {
        Self {
            snapshot,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Node names captured at startup
    pub fn snapshot(&self) -> &[String] {
        &self.snapshot
    }
}

impl NodeSelector for RoundRobin {
    fn name(&self) -> &'static str {
        "round robin"
    }

    fn pick<'a>(&self, candidates: &'a [Node]) -> Result<&'a Node> {
        require_candidates(candidates)?;

        let tick = self.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(&candidates[tick % candidates.len()])
    }
}

// =============================================================================
// Capacity Aware
// =============================================================================

/// Picks the candidate advertising the most remaining capacity
pub struct CapacityAware;

impl NodeSelector for CapacityAware {
    fn name(&self) -> &'static str {
        "capacity"
    }

    fn pick<'a>(&self, candidates: &'a [Node]) -> Result<&'a Node> {
        require_candidates(candidates)?;

        let mut best: Option<(&'a Node, u64)> = None;
        for node in candidates {
            let Some(capacity) = node.advertised_capacity() else {
                tracing::debug!(node = %node.name_any(), "No advertised capacity, skipping");
                continue;
            };
            // Strictly greater keeps the first of equal candidates
            if best.map_or(true, |(_, max)| capacity > max) {
                best = Some((node, capacity));
            }
        }

        best.map(|(node, _)| node).ok_or(Error::NoCapacityInformation)
    }
}
