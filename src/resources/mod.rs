//! Kubernetes resource helpers
//!
//! Annotation keys, capacity quantities and typed accessors over the core
//! objects the provisioner reads and writes:
//! - PersistentVolumeClaim: the volume request
//! - PersistentVolume: the materialized volume
//! - Node: advertised local storage capacity

pub mod claim;
pub mod node;
pub mod quantity;
pub mod volume;

pub use claim::*;
pub use node::*;
pub use quantity::*;
pub use volume::*;

// =============================================================================
// Well-known keys
// =============================================================================

/// Provisioner name registered on storage classes handled by this system
pub const LOCAL_PROVISIONER: &str = "localpv.dev/local";

/// Node status capacity entry holding the remaining local storage in bytes
pub const LV_CAPACITY: &str = "localpv.dev/lv-capacity";

/// Claim annotation carrying the node the volume was assigned to
pub const NODE_NAME_ANNOTATION: &str = "localpv.dev/nodeName";

/// Claim annotation carrying the host directory name of the volume
pub const PV_DIR_NAME_ANNOTATION: &str = "localpv.dev/pvDirName";

/// Claim annotation with an explicit JSON node selector
pub const NODE_SELECTOR_ANNOTATION: &str = "localpv.dev/nodeSelector";

/// Claim annotation recording the last completed allocation step
pub const ALLOCATION_STATE_ANNOTATION: &str = "localpv.dev/allocationState";

/// Claim annotation recording the quota project id reserved for the volume
pub const PROJECT_ID_ANNOTATION: &str = "localpv.dev/projectId";

/// Resource key for storage requests and capacities
pub const STORAGE_RESOURCE: &str = "storage";
