//! Local PV Provisioner
//!
//! Dynamic provisioning of host-local, quota-limited directories for claims
//! of a local storage class.
//!
//! # Architecture
//!
//! ```text
//!   claim ──► webhook: AdmissionMutator ──► node + directory + volume name
//!                         │
//!                         └─ NodeSelector (round robin | capacity)
//!
//!   per node executor
//!   ├─ VolumeAllocator   claim events  ─► mkdir, ledgers, xfs quota, bind mount
//!   └─ CapacityTracker   volume events ─► node status lv-capacity
//! ```
//!
//! # Modules
//!
//! - [`admission`]: node selection, identity and the webhook server
//! - [`provisioner`]: allocator, capacity tracker and host adapters
//! - [`cluster`]: kube client adapter and typed watch loops
//! - [`resources`]: annotation keys and object accessors
//! - [`domain`]: port traits
//! - [`error`]: error types and handling

pub mod admission;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod provisioner;
pub mod resources;

#[cfg(test)]
pub(crate) mod testing;

pub use admission::{AdmissionMutator, DefaultSelectors, NodeSelector, SelectionMethod};
pub use cluster::{spawn_controller, EventHandler, KubeClusterClient, ResourceEvent};
pub use config::{ExecutorConfig, WebhookConfig};
pub use domain::ports::{ClusterClient, MountManager, QuotaManager};
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use provisioner::{BindMounter, CapacityTracker, Ledgers, VolumeAllocator, XfsQuota};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
