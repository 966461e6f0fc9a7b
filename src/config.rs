//! Process Configuration
//!
//! Settings for the two subcommands, filled from CLI flags and environment.

use crate::admission::SelectionMethod;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SELECTOR_CONFIG: &str = "/etc/config/config.yml";
pub const DEFAULT_PROJECTS_FILE: &str = "/etc/projects";
pub const DEFAULT_PROJID_FILE: &str = "/etc/projid";
pub const DEFAULT_FSTAB_FILE: &str = "/rootfs/fstab";

// =============================================================================
// Webhook
// =============================================================================

/// Configuration of the admission webhook
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// HTTPS bind address
    pub listen_addr: SocketAddr,
    /// PEM certificate chain
    pub tls_cert: PathBuf,
    /// PEM private key
    pub tls_key: PathBuf,
    /// Operator-wide `key=value` label restricting candidate nodes
    pub node_label: Option<String>,
    pub selection_method: SelectionMethod,
    /// Per storage class default selectors
    pub default_selector_config: PathBuf,
    pub request_timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 443)),
            tls_cert: PathBuf::new(),
            tls_key: PathBuf::new(),
            node_label: None,
            selection_method: SelectionMethod::RoundRobin,
            default_selector_config: PathBuf::from(DEFAULT_SELECTOR_CONFIG),
            request_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Executor
// =============================================================================

/// Configuration of the per-node executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Name of the node this executor runs on
    pub node_name: String,
    /// Mount point of the quota-enabled storage filesystem
    pub storage_path: PathBuf,
    pub projects_file: PathBuf,
    pub projid_file: PathBuf,
    pub fstab_file: PathBuf,
    /// Interval between full redeliveries of watched objects
    pub resync: Duration,
    /// Health and metrics bind address
    pub metrics_addr: SocketAddr,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            storage_path: PathBuf::new(),
            projects_file: PathBuf::from(DEFAULT_PROJECTS_FILE),
            projid_file: PathBuf::from(DEFAULT_PROJID_FILE),
            fstab_file: PathBuf::from(DEFAULT_FSTAB_FILE),
            resync: Duration::from_secs(30),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl ExecutorConfig {
    /// Ledger file locations
    pub fn ledgers(&self) -> crate::provisioner::Ledgers {
        crate::provisioner::Ledgers::new(&self.projects_file, &self.projid_file, &self.fstab_file)
    }
}
