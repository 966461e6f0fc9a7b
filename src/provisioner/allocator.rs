//! Volume Allocator
//!
//! Turns a claim assigned to this node into a quota-limited, bind-mounted
//! directory, and tears it down again when a bound claim with a Delete volume
//! goes away.
//!
//! Allocation walks `Unallocated → DirectoryReserved → QuotaConfigured →
//! Mounted → Registered`. Each completed state is written back to the claim
//! together with the project id, so an interrupted allocation resumes from
//! the next step on a later event instead of starting over.

use super::ledger::Ledgers;
use super::retry::{retry_on_conflict, RetryPolicy};
use super::state::{AllocationState, TeardownStep};
use crate::admission::identity::directory_name;
use crate::cluster::{EventHandler, ResourceEvent};
use crate::domain::ports::{ClusterClientRef, MountManagerRef, QuotaManagerRef};
use crate::error::{Error, Result};
use crate::metrics::{Metrics, OUTCOME_FAILURE, OUTCOME_SKIPPED, OUTCOME_SUCCESS};
use crate::resources::{
    ClaimExt, ClaimPhase, NodeExt, ReclaimPolicy, VolumeExt, ALLOCATION_STATE_ANNOTATION,
    LOCAL_PROVISIONER, PROJECT_ID_ANNOTATION, PV_DIR_NAME_ANNOTATION,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Progress of one allocation, as recorded on the claim
#[derive(Debug, Clone, PartialEq, Eq)]
struct Progress {
    state: AllocationState,
    project_id: Option<u32>,
    dir_name: String,
}

fn recorded_state(claim: &PersistentVolumeClaim) -> Option<AllocationState> {
    claim
        .annotations()
        .get(ALLOCATION_STATE_ANNOTATION)
        .and_then(|s| AllocationState::parse(s))
}

fn recorded_project_id(claim: &PersistentVolumeClaim) -> Option<u32> {
    claim
        .annotations()
        .get(PROJECT_ID_ANNOTATION)
        .and_then(|s| s.parse().ok())
}

/// Per-node allocator for local claims
pub struct VolumeAllocator {
    cluster: ClusterClientRef,
    quota: QuotaManagerRef,
    mounter: MountManagerRef,
    node_name: String,
    storage_path: PathBuf,
    ledgers: Ledgers,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl VolumeAllocator {
    pub fn new(
        cluster: ClusterClientRef,
        quota: QuotaManagerRef,
        mounter: MountManagerRef,
        node_name: impl Into<String>,
        storage_path: impl Into<PathBuf>,
        ledgers: Ledgers,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cluster,
            quota,
            mounter,
            node_name: node_name.into(),
            storage_path: storage_path.into(),
            ledgers,
            retry: RetryPolicy::default(),
            metrics,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn volume_path(&self, dir_name: &str) -> PathBuf {
        self.storage_path.join(dir_name)
    }

    /// Whether the claim's storage class is served by this provisioner
    async fn is_local_class(&self, claim: &PersistentVolumeClaim) -> Result<bool> {
        let Some(class) = claim.storage_class() else {
            return Ok(false);
        };
        match self.cluster.get_storage_class(class).await {
            Ok(sc) => Ok(sc.provisioner == LOCAL_PROVISIONER),
            Err(Error::ResourceNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// A claim appeared (`old == None`) or changed
    pub async fn on_claim_changed(
        &self,
        old: Option<&PersistentVolumeClaim>,
        claim: &PersistentVolumeClaim,
    ) -> Result<()> {
        if claim.assigned_node() != Some(self.node_name.as_str()) {
            return Ok(());
        }
        if claim.phase() != ClaimPhase::Pending {
            return Ok(());
        }

        match recorded_state(claim) {
            Some(state) if state.is_terminal() => Ok(()),
            Some(state) if state != AllocationState::Unallocated => self.resume(claim).await,
            _ => {
                // Only the first sighting of the assignment starts an allocation
                let first_assignment = old.map_or(true, |o| o.assigned_node().is_none());
                if !first_assignment {
                    return Ok(());
                }
                if !self.is_local_class(claim).await? {
                    return Ok(());
                }
                self.start(claim).await
            }
        }
    }

    /// Fresh allocation, guarded by directory existence and capacity
    async fn start(&self, claim: &PersistentVolumeClaim) -> Result<()> {
        let key = claim.claim_key();
        let dir_name = match claim.pv_dir_name() {
            Some(dir) => dir.to_string(),
            None => directory_name(&claim.namespace().unwrap_or_default(), &claim.name_any()),
        };
        let path = self.volume_path(&dir_name);

        if path.exists() {
            debug!(claim = %key, path = %path.display(), "Directory exists, already allocated");
            return Ok(());
        }

        let requested = claim.requested_bytes()?;
        let node = self.cluster.get_node(&self.node_name).await?;
        let available = node.advertised_capacity().unwrap_or(0);
        if requested > available {
            let err = Error::InsufficientCapacity {
                requested,
                available,
            };
            warn!(claim = %key, node = %self.node_name, "Not allocating: {}", err);
            self.metrics.record_allocation(OUTCOME_SKIPPED);
            return Ok(());
        }

        let progress = Progress {
            state: AllocationState::Unallocated,
            project_id: None,
            dir_name,
        };
        self.run(claim, progress, requested).await
    }

    /// Continue a recorded allocation from the freshest copy of the claim
    async fn resume(&self, stale: &PersistentVolumeClaim) -> Result<()> {
        let namespace = stale.namespace().unwrap_or_default();
        let Some(claim) = self.cluster.get_claim(&namespace, &stale.name_any()).await? else {
            debug!(claim = %stale.claim_key(), "Claim gone, nothing to resume");
            return Ok(());
        };

        let state = match recorded_state(&claim) {
            Some(state) if !state.is_terminal() => state,
            _ => return Ok(()),
        };
        if claim.phase() != ClaimPhase::Pending {
            return Ok(());
        }
        let dir_name = claim.pv_dir_name().map(str::to_string).ok_or_else(|| {
            Error::Internal(format!(
                "claim {} records {} without a directory name",
                claim.claim_key(),
                state
            ))
        })?;

        info!(claim = %claim.claim_key(), %state, "Resuming allocation");
        let progress = Progress {
            state,
            project_id: recorded_project_id(&claim),
            dir_name,
        };
        let requested = claim.requested_bytes()?;
        self.run(&claim, progress, requested).await
    }

    /// Drive the state machine to `Registered`
    async fn run(
        &self,
        claim: &PersistentVolumeClaim,
        mut progress: Progress,
        requested: u64,
    ) -> Result<()> {
        let key = claim.claim_key();

        while let Some(next) = progress.state.next() {
            if let Err(e) = self.step(next, &mut progress, requested).await {
                error!(claim = %key, step = %next, "Allocation aborted: {}", e);
                self.metrics.record_allocation(OUTCOME_FAILURE);
                return Err(e);
            }
            progress.state = next;
            self.record_progress(claim, &progress).await?;
            debug!(claim = %key, state = %progress.state, "Allocation step done");
        }

        info!(
            claim = %key,
            path = %self.volume_path(&progress.dir_name).display(),
            project_id = progress.project_id,
            bytes = requested,
            "Local volume allocated"
        );
        self.metrics.record_allocation(OUTCOME_SUCCESS);
        Ok(())
    }

    /// Perform the work that leads into `next`
    async fn step(
        &self,
        next: AllocationState,
        progress: &mut Progress,
        requested: u64,
    ) -> Result<()> {
        let path = self.volume_path(&progress.dir_name);
        let project = progress.dir_name.as_str();

        match next {
            AllocationState::Unallocated => Ok(()),
            AllocationState::DirectoryReserved => {
                progress.project_id = Some(self.ledgers.next_project_id()?);
                std::fs::create_dir(&path).map_err(Error::Io)
            }
            AllocationState::QuotaConfigured => {
                let id = progress.project_id.ok_or_else(|| {
                    Error::Internal(format!("no project id recorded for {}", path.display()))
                })?;
                self.ledgers.record_project(id, &path, project)?;
                self.quota.create_project(project).await?;
                self.quota.set_hard_limit(project, requested).await
            }
            AllocationState::Mounted => self.mounter.bind_mount(&path),
            AllocationState::Registered => self.ledgers.record_mount(&path),
        }
    }

    /// Write the allocation progress onto the claim
    async fn record_progress(&self, claim: &PersistentVolumeClaim, progress: &Progress) -> Result<()> {
        let namespace = claim.namespace().unwrap_or_default();
        let name = claim.name_any();

        retry_on_conflict(&self.retry, "record allocation state", || async {
            let mut fresh = self
                .cluster
                .get_claim(&namespace, &name)
                .await?
                .ok_or_else(|| Error::ResourceNotFound {
                    kind: "PersistentVolumeClaim".to_string(),
                    name: format!("{}/{}", namespace, name),
                })?;

            let annotations = fresh.annotations_mut();
            annotations.insert(
                ALLOCATION_STATE_ANNOTATION.to_string(),
                progress.state.to_string(),
            );
            annotations.insert(PV_DIR_NAME_ANNOTATION.to_string(), progress.dir_name.clone());
            if let Some(id) = progress.project_id {
                annotations.insert(PROJECT_ID_ANNOTATION.to_string(), id.to_string());
            }
            self.cluster.replace_claim(&fresh).await
        })
        .await?;
        Ok(())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// A claim was deleted
    pub async fn on_claim_deleted(&self, claim: &PersistentVolumeClaim) -> Result<()> {
        if claim.assigned_node() != Some(self.node_name.as_str())
            || claim.phase() != ClaimPhase::Bound
        {
            return Ok(());
        }
        let Some(volume_name) = claim.volume_name() else {
            return Ok(());
        };
        if !self.is_local_class(claim).await? {
            return Ok(());
        }

        let Some(volume) = self.cluster.get_volume(volume_name).await? else {
            warn!(claim = %claim.claim_key(), volume = volume_name, "Volume not found, skipping teardown");
            return Ok(());
        };
        if volume.reclaim_policy() != ReclaimPolicy::Delete {
            debug!(volume = volume_name, "Volume is not reclaimed by deletion");
            return Ok(());
        }

        let path = match (volume.local_path(), claim.pv_dir_name()) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(dir)) => self.volume_path(dir),
            (None, None) => {
                warn!(volume = volume_name, "Volume has no local path, skipping teardown");
                return Ok(());
            }
        };

        let failed = self.teardown(&path).await;
        if failed.is_empty() {
            info!(claim = %claim.claim_key(), path = %path.display(), "Local volume released");
            self.metrics.record_deallocation(OUTCOME_SUCCESS);
        } else {
            self.metrics.record_deallocation(OUTCOME_FAILURE);
        }
        Ok(())
    }

    /// Run every teardown step, returning the ones that failed
    pub async fn teardown(&self, path: &Path) -> Vec<TeardownStep> {
        let project = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut failed = Vec::new();

        for step in TeardownStep::ALL {
            let result = match step {
                TeardownStep::Unmounted => self.mounter.unmount(path),
                TeardownStep::QuotaCleared => self.quota.clear_project(&project).await,
                TeardownStep::ProjectRecordRemoved => self.ledgers.forget_project_path(path),
                TeardownStep::ProjidRecordRemoved => self.ledgers.forget_project_name(&project),
                TeardownStep::MountRecordRemoved => self.ledgers.forget_mount(path),
                TeardownStep::DirectoryRemoved if failed.contains(&TeardownStep::Unmounted) => {
                    Err(Error::Mount {
                        path: path.display().to_string(),
                        reason: "still mounted, keeping directory".to_string(),
                    })
                }
                TeardownStep::DirectoryRemoved => match std::fs::remove_dir_all(path) {
                    Err(e) if e.kind() != ErrorKind::NotFound => Err(Error::Io(e)),
                    _ => Ok(()),
                },
            };
            if let Err(e) = result {
                error!(path = %path.display(), %step, "Teardown step failed: {}", e);
                failed.push(step);
            }
        }
        failed
    }
}

#[async_trait]
impl EventHandler<PersistentVolumeClaim> for VolumeAllocator {
    async fn handle(&self, event: ResourceEvent<PersistentVolumeClaim>) -> Result<()> {
        match event {
            ResourceEvent::Added(claim) => self.on_claim_changed(None, &claim).await,
            ResourceEvent::Updated { old, new } => self.on_claim_changed(Some(&old), &new).await,
            ResourceEvent::Deleted(claim) => self.on_claim_deleted(&claim).await,
        }
    }
}
