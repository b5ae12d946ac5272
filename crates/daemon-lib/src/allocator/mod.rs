//! Pluggable CPU allocation policies.
//!
//! One variant per policy family; the per-namespace allocator covers both the
//! shared and the exclusive flavor through its `exclusive` flag. All variants
//! share the take/free/clear operation set and mutate the daemon state they
//! are handed.

mod default;
mod numa;
mod numa_namespace;

pub use default::DefaultAllocator;
pub use numa::NumaAllocator;
pub use numa_namespace::NumaNamespaceAllocator;

use crate::error::Result;
use crate::models::Container;
use crate::state::DaemonState;

pub enum Allocator {
    Default(DefaultAllocator),
    Numa(NumaAllocator),
    NumaPerNamespace(NumaNamespaceAllocator),
}

impl Allocator {
    /// Reserves CPUs for the container and writes its cpuset.
    pub async fn take_cpus(&self, c: &Container, s: &mut DaemonState) -> Result<()> {
        match self {
            Allocator::Default(a) => a.take_cpus(c, s).await,
            Allocator::Numa(a) => a.take_cpus(c, s).await,
            Allocator::NumaPerNamespace(a) => a.take_cpus(c, s).await,
        }
    }

    /// Returns the container's CPUs to the pool. The cgroup slice itself is
    /// left for the kubelet's garbage collection.
    pub async fn free_cpus(&self, c: &Container, s: &mut DaemonState) -> Result<()> {
        match self {
            Allocator::Default(a) => a.free_cpus(c, s).await,
            Allocator::Numa(a) => a.free_cpus(c, s).await,
            Allocator::NumaPerNamespace(a) => a.free_cpus(c, s).await,
        }
    }

    /// Rewrites the container's cpuset to the widest sensible set, undoing
    /// any pinning without touching the allocation bookkeeping.
    pub async fn clear_cpus(&self, c: &Container, s: &mut DaemonState) -> Result<()> {
        match self {
            Allocator::Default(a) => a.clear_cpus(c, s).await,
            Allocator::Numa(a) => a.clear_cpus(c, s).await,
            Allocator::NumaPerNamespace(a) => a.clear_cpus(c, s).await,
        }
    }
}
