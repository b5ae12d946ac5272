//! NUMA-proximity-minimizing allocator.
//!
//! Guaranteed containers get CPUs from the topology tree, chosen to minimize
//! the distance to their nearest common ancestor. With memory pinning enabled
//! the cpuset's `mems` is narrowed to the NUMA nodes of the chosen CPUs.

use crate::cgroup::{CgroupController, RESOURCE_NOT_SET};
use crate::cpuset::{CpuBucket, CpuSet};
use crate::error::{DaemonError, Result};
use crate::models::{Container, QosClass};
use crate::state::DaemonState;
use crate::topology::NumaTopology;
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct NumaAllocator {
    ctrl: Arc<dyn CgroupController>,
    memory_pinning: bool,
}

impl NumaAllocator {
    pub fn new(ctrl: Arc<dyn CgroupController>, memory_pinning: bool) -> Self {
        Self { ctrl, memory_pinning }
    }

    pub(crate) async fn take_cpus(&self, c: &Container, s: &mut DaemonState) -> Result<()> {
        if c.qos != QosClass::Guaranteed {
            return Ok(());
        }

        let cpu_ids = s
            .topology
            .take(c.cpus)
            .map_err(|e| DaemonError::CpusNotAvailable(e.to_string()))?;

        let allocated = s.allocated.entry(c.cid.clone()).or_default();
        for &cpu in &cpu_ids {
            allocated.push(CpuBucket::new(cpu, cpu));
        }

        let cpus = cpu_ids
            .iter()
            .map(|cpu| cpu.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let mems = memory_pinning_if_enabled(self.memory_pinning, &s.topology, &cpu_ids);
        self.ctrl.update_cpuset(&s.cgroup_root, c, &cpus, &mems).await
    }

    pub(crate) async fn free_cpus(&self, c: &Container, s: &mut DaemonState) -> Result<()> {
        if c.qos != QosClass::Guaranteed {
            return Ok(());
        }

        let freed = s.allocated.remove(&c.cid).ok_or_else(|| {
            DaemonError::ContainerNotFound(format!(
                "container {} not available for deletion",
                c.cid
            ))
        })?;

        for bucket in freed {
            for cpu in bucket.start_cpu..=bucket.end_cpu {
                s.topology
                    .release(cpu)
                    .map_err(|e| DaemonError::CpusNotAvailable(e.to_string()))?;
            }
        }
        Ok(())
    }

    pub(crate) async fn clear_cpus(&self, c: &Container, s: &mut DaemonState) -> Result<()> {
        let cpus: CpuSet = s.topology.leaves().iter().map(|leaf| leaf.value).collect();
        let mems =
            memory_pinning_if_enabled(self.memory_pinning, &s.topology, &cpus.sorted());
        self.ctrl
            .update_cpuset(&s.cgroup_root, c, &cpus.to_cpu_string(), &mems)
            .await
    }
}

/// Comma-joined sorted NUMA node ids hosting `cpu_ids`, or the unset marker
/// when pinning is disabled.
pub(crate) fn memory_pinning_if_enabled(
    enabled: bool,
    topology: &NumaTopology,
    cpu_ids: &[usize],
) -> String {
    if !enabled {
        return RESOURCE_NOT_SET.to_string();
    }
    let nodes: BTreeSet<usize> = cpu_ids
        .iter()
        .filter_map(|cpu| topology.cpu_info.get(cpu).map(|info| info.node))
        .collect();
    nodes
        .iter()
        .map(|node| node.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
