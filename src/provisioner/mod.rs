//! Node Executor
//!
//! Everything that runs on a storage node:
//! - [`capacity`]: advertised capacity accounting from volume events
//! - [`allocator`]: directory, quota and mount lifecycle from claim events
//! - [`ledger`]: the projects, projid and fstab files
//! - [`quota`] and [`mount`]: host adapters

pub mod allocator;
pub mod capacity;
pub mod ledger;
pub mod mount;
pub mod quota;
pub mod retry;
pub mod state;

pub use allocator::VolumeAllocator;
pub use capacity::CapacityTracker;
pub use ledger::{BindMountEntry, LedgerFile, LedgerRecord, Ledgers, ProjectEntry, ProjidEntry};
pub use mount::{available_bytes, BindMounter};
pub use quota::XfsQuota;
pub use retry::{retry_on_conflict, RetryPolicy};
pub use state::{AllocationState, TeardownStep};
