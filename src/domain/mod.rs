//! Ports
//!
//! Traits separating provisioning logic from the cluster API and the host OS.

pub mod ports;

pub use ports::*;
