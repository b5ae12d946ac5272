//! Static policy: a thin binding of an allocator to container operations.

use crate::allocator::Allocator;
use crate::error::Result;
use crate::models::Container;
use crate::state::DaemonState;

pub struct StaticPolicy {
    allocator: Allocator,
}

impl StaticPolicy {
    pub fn new(allocator: Allocator) -> Self {
        Self { allocator }
    }

    /// Allocates CPUs for a container.
    pub async fn assign_container(&self, c: &Container, s: &mut DaemonState) -> Result<()> {
        self.allocator.take_cpus(c, s).await
    }

    /// Frees a container's allocation. The cgroup configuration is left
    /// behind for the kubelet's garbage collection.
    pub async fn delete_container(&self, c: &Container, s: &mut DaemonState) -> Result<()> {
        self.allocator.free_cpus(c, s).await
    }

    /// Reverts the container's cpuset to the widest set without touching the
    /// allocation bookkeeping; pair with [`StaticPolicy::delete_container`]
    /// to fully undo an assignment.
    pub async fn clear_container(&self, c: &Container, s: &mut DaemonState) -> Result<()> {
        self.allocator.clear_cpus(c, s).await
    }
}
