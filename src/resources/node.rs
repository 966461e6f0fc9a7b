//! Node capacity accessors

use super::quantity::{bytes_to_quantity, quantity_to_bytes};
use super::LV_CAPACITY;
use k8s_openapi::api::core::v1::{Node, NodeStatus};
use kube::ResourceExt;
use tracing::warn;

/// Read and write the advertised local storage capacity of a node
pub trait NodeExt {
    /// Advertised remaining local storage in bytes, if published
    fn advertised_capacity(&self) -> Option<u64>;
    /// Overwrite the advertised remaining local storage
    fn set_advertised_capacity(&mut self, bytes: u64);
}

impl NodeExt for Node {
    fn advertised_capacity(&self) -> Option<u64> {
        let quantity = self
            .status
            .as_ref()
            .and_then(|s| s.capacity.as_ref())
            .and_then(|c| c.get(LV_CAPACITY))?;
        match quantity_to_bytes(quantity) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(node = %self.name_any(), "Ignoring unparseable {}: {}", LV_CAPACITY, e);
                None
            }
        }
    }

    fn set_advertised_capacity(&mut self, bytes: u64) {
        self.status
            .get_or_insert_with(NodeStatus::default)
            .capacity
            .get_or_insert_with(Default::default)
            .insert(LV_CAPACITY.to_string(), bytes_to_quantity(bytes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capacity_roundtrip() {
        let mut node: Node = serde_json::from_value(json!({
            "metadata": { "name": "worker-1" },
            "status": { "capacity": { "cpu": "4" } }
        }))
        .unwrap();
        assert_eq!(node.advertised_capacity(), None);

        node.set_advertised_capacity(5 * 1024 * 1024 * 1024);
        assert_eq!(node.advertised_capacity(), Some(5 * 1024 * 1024 * 1024));

        // Other capacity entries are untouched
        let capacity = node.status.as_ref().unwrap().capacity.as_ref().unwrap();
        assert_eq!(capacity.get("cpu").unwrap().0, "4");
    }

    #[test]
    fn test_capacity_in_binary_units() {
        let node: Node = serde_json::from_value(json!({
            "metadata": { "name": "worker-1" },
            "status": { "capacity": { "localpv.dev/lv-capacity": "100Gi" } }
        }))
        .unwrap();
        assert_eq!(node.advertised_capacity(), Some(100 * 1024 * 1024 * 1024));
    }

    #[test]
    fn test_set_capacity_on_node_without_status() {
        let mut node = Node::default();
        node.set_advertised_capacity(42);
        assert_eq!(node.advertised_capacity(), Some(42));
    }
}
