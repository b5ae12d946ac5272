//! Shared helpers for the crate's tests: state builders and a recording
//! stand-in for the cgroup writer.

use crate::cgroup::CgroupController;
use crate::cpuset::CpuBucket;
use crate::error::{DaemonError, Result};
use crate::models::{Container, PodMetadata, QosClass};
use crate::state::{DaemonState, NamespaceBuckets};
use crate::topology::NumaTopology;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One observed cgroup write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedWrite {
    pub cid: String,
    pub cpus: String,
    pub mems: String,
}

/// CgroupController that records writes instead of touching a filesystem,
/// optionally failing for selected container ids.
#[derive(Default)]
pub(crate) struct RecordingController {
    writes: Mutex<Vec<RecordedWrite>>,
    fail_for: Mutex<Vec<String>>,
}

impl RecordingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, cid: &str) {
        self.fail_for.lock().unwrap().push(cid.to_string());
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn last_write(&self) -> Option<RecordedWrite> {
        self.writes.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CgroupController for RecordingController {
    async fn update_cpuset(
        &self,
        _cgroup_root: &Path,
        c: &Container,
        cpus: &str,
        mems: &str,
    ) -> Result<()> {
        if self.fail_for.lock().unwrap().iter().any(|cid| cid == &c.cid) {
            return Err(DaemonError::Runtime(format!(
                "injected cgroup failure for {}",
                c.cid
            )));
        }
        self.writes.lock().unwrap().push(RecordedWrite {
            cid: c.cid.clone(),
            cpus: cpus.to_string(),
            mems: mems.to_string(),
        });
        Ok(())
    }
}

pub(crate) fn container(cid: &str, pod_id: &str, qos: QosClass, cpus: usize) -> Container {
    Container {
        cid: cid.to_string(),
        pod_id: pod_id.to_string(),
        name: format!("{pod_id}-container"),
        cpus,
        qos,
    }
}

pub(crate) fn pod(pod_id: &str, namespace: &str) -> PodMetadata {
    PodMetadata {
        pod_id: pod_id.to_string(),
        name: format!("{pod_id}-name"),
        namespace: namespace.to_string(),
        containers: Vec::new(),
    }
}

fn empty_state() -> DaemonState {
    DaemonState {
        available_cpus: Vec::new(),
        allocated: BTreeMap::new(),
        pods: BTreeMap::new(),
        topology: NumaTopology::from_cpu_info(&[]),
        namespaces: NamespaceBuckets::default(),
        cgroup_root: PathBuf::from("/sys/fs/cgroup"),
        state_path: PathBuf::new(),
    }
}

/// State for default-allocator tests: a free pool, no topology.
pub(crate) fn state_with_available(available: &[CpuBucket]) -> DaemonState {
    let mut state = empty_state();
    state.available_cpus = available.to_vec();
    state
}

/// State for NUMA-allocator tests.
pub(crate) fn state_with_topology(topology: NumaTopology) -> DaemonState {
    let mut state = empty_state();
    state.topology = topology;
    state
}
