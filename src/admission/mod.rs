//! Admission Webhook
//!
//! Node assignment and volume identity for new local claims:
//! - [`selector`]: candidate label selectors
//! - [`strategy`]: round robin and capacity-aware node choice
//! - [`identity`]: directory and volume names
//! - [`mutator`]: the review logic
//! - [`server`]: HTTPS endpoint

pub mod identity;
pub mod mutator;
pub mod review;
pub mod selector;
pub mod server;
pub mod strategy;

pub use identity::{directory_name, fnv1a_32, volume_name};
pub use mutator::AdmissionMutator;
pub use review::{AdmissionRequest, AdmissionResponse, AdmissionReview, PatchOperation};
pub use selector::{build_selector, DefaultSelectors, SelectorSource};
pub use strategy::{CapacityAware, NodeSelector, NodeSelectorRef, RoundRobin, SelectionMethod};
