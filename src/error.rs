//! Error types for the local volume provisioner
//!
//! Provides structured error types for the admission webhook, the capacity
//! tracker and the per-node volume allocator.

use thiserror::Error;

/// Unified error type for the provisioner
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Conflicting write to {kind}/{name}: object was modified")]
    Conflict { kind: String, name: String },

    #[error("Watch stream error: {0}")]
    Watch(String),

    // =========================================================================
    // Node Selection Errors
    // =========================================================================
    #[error("No nodes found for selector: {selector:?}")]
    NoMatchingNodes { selector: String },

    #[error("No lv-capacity set on any candidate node, yet")]
    NoCapacityInformation,

    #[error("Cannot parse node selector {selector}: {reason}")]
    MalformedSelector { selector: String, reason: String },

    // =========================================================================
    // Capacity Errors
    // =========================================================================
    #[error("Insufficient capacity: requested {requested} bytes, available {available} bytes")]
    InsufficientCapacity { requested: u64, available: u64 },

    #[error("Node {node} does not advertise local storage capacity")]
    MissingCapacity { node: String },

    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    // =========================================================================
    // Host Resource Errors
    // =========================================================================
    #[error("Quota command failed: {command} - {reason}")]
    QuotaCommand { command: String, reason: String },

    #[error("Mount operation failed on {path}: {reason}")]
    Mount { path: String, reason: String },

    #[error("Ledger {path} error: {reason}")]
    Ledger { path: String, reason: String },

    #[error("Filesystem statistics unavailable for {path}: {reason}")]
    FilesystemStats { path: String, reason: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Check if this error is transient and may succeed on a later resync
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::Conflict { .. } | Error::Watch(_)
        )
    }

    /// Check if this error is a policy violation rather than a failure
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Error::NoMatchingNodes { .. }
                | Error::NoCapacityInformation
                | Error::MalformedSelector { .. }
                | Error::InsufficientCapacity { .. }
                | Error::MissingCapacity { .. }
        )
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;
