//! The daemon's single mutable aggregate and its on-disk persistence.
//!
//! State is built once at startup from the host's effective cpuset, a sysfs
//! topology walk and (when present) the previous state file, and is mutated
//! only inside the daemon's critical section.

use crate::cgroup::CgroupMode;
use crate::cpuset::{self, CpuBucket};
use crate::error::DaemonError;
use crate::fsutil::{self, FsGuardError};
use crate::models::PodMetadata;
use crate::topology::NumaTopology;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::info;

const STATE_FILE_MODE: u32 = 0o600;

#[derive(Debug, Error)]
pub enum StateError {
    /// The state path resolves through a symbolic link; loading through it
    /// would follow whatever the link owner substituted.
    #[error("refusing state file behind a symbolic link: {0:?}")]
    SymlinkRefused(PathBuf),
    #[error("cannot access state file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot decode state file: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Bookkeeping of the per-namespace allocator. Lives in the state so it is
/// persisted and covered by the same lock as everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceBuckets {
    /// Namespace name to bucket index.
    pub namespace_to_bucket: BTreeMap<String, usize>,
    /// Bucket index to number of admitted containers.
    pub bucket_to_num_containers: BTreeMap<usize, usize>,
    /// Monotonic admission counter driving the round-robin.
    pub next_bucket: usize,
}

/// Everything the daemon knows, in one serializable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonState {
    /// Free pool as ranges; consumed only by the default allocator.
    pub available_cpus: Vec<CpuBucket>,
    /// Container id to pinned CPU buckets.
    pub allocated: BTreeMap<String, Vec<CpuBucket>>,
    /// Pod id to pod metadata.
    pub pods: BTreeMap<String, PodMetadata>,
    /// Machine topology; consumed by the NUMA-aware allocators.
    pub topology: NumaTopology,
    /// Per-namespace allocator bookkeeping.
    pub namespaces: NamespaceBuckets,
    /// Root of the cgroup filesystem (usually /sys/fs/cgroup).
    pub cgroup_root: PathBuf,
    /// Where this record is persisted.
    pub state_path: PathBuf,
}

impl DaemonState {
    /// Builds startup state: reads the effective cpuset, discovers topology,
    /// then either creates a fresh state file or reloads the existing one.
    pub async fn new(
        cgroup_root: &Path,
        mode: CgroupMode,
        topology_path: &Path,
        state_path: &Path,
    ) -> Result<Self, DaemonError> {
        let (cpuset_dir, cpuset_file) = match mode {
            CgroupMode::Legacy => (cgroup_root.join("cpuset"), "cpuset.cpus"),
            CgroupMode::Unified => (cgroup_root.to_path_buf(), "cpuset.cpus.effective"),
        };
        let available_cpus = load_cpuset_file(&cpuset_dir.join(cpuset_file))
            .await
            .map_err(DaemonError::MissingCgroup)?;

        let topology = NumaTopology::load(topology_path)
            .await
            .map_err(|e| DaemonError::Runtime(e.to_string()))?;

        let mut state = DaemonState {
            available_cpus,
            allocated: BTreeMap::new(),
            pods: BTreeMap::new(),
            topology,
            namespaces: NamespaceBuckets::default(),
            cgroup_root: cgroup_root.to_path_buf(),
            state_path: state_path.to_path_buf(),
        };

        if fs::metadata(state_path).await.is_ok() {
            info!(state_path = %state_path.display(), "reloading previous state");
            state
                .load()
                .await
                .map_err(|e| DaemonError::Runtime(e.to_string()))?;
        } else {
            state
                .save()
                .await
                .map_err(|e| DaemonError::Runtime(e.to_string()))?;
        }
        Ok(state)
    }

    /// Persists the state as JSON with owner-only permissions.
    pub async fn save(&self) -> Result<(), StateError> {
        use std::os::unix::fs::PermissionsExt;

        let encoded = serde_json::to_vec(self)?;
        fs::write(&self.state_path, encoded).await?;
        fs::set_permissions(
            &self.state_path,
            std::fs::Permissions::from_mode(STATE_FILE_MODE),
        )
        .await?;
        Ok(())
    }

    /// Reloads from the state path. The configured path always wins over
    /// whatever path the file itself recorded (state files may be copied
    /// between hosts).
    pub async fn load(&mut self) -> Result<(), StateError> {
        let state_path = self.state_path.clone();
        match fsutil::error_if_symlink(&state_path).await {
            Ok(()) => {}
            Err(FsGuardError::Symlink(path)) => return Err(StateError::SymlinkRefused(path)),
            Err(FsGuardError::Io(e)) => return Err(StateError::Io(e)),
            Err(FsGuardError::PathOutsideBase { .. }) => unreachable!("no base check here"),
        }
        let raw = fs::read(&state_path).await?;
        *self = serde_json::from_slice(&raw)?;
        self.state_path = state_path;
        Ok(())
    }
}

/// Reads and parses a cpuset file (`"0-63"` and friends).
async fn load_cpuset_file(path: &Path) -> Result<Vec<CpuBucket>, String> {
    let contents = fs::read_to_string(path)
        .await
        .map_err(|e| format!("cannot read effective cpuset {path:?}: {e}"))?;
    cpuset::parse_buckets(&contents).map_err(|e| format!("bad cpuset in {path:?}: {e}"))
}
