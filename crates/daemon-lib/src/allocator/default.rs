//! Flat sequential allocator over the host's available-CPU ranges.

use crate::cgroup::{CgroupController, RESOURCE_NOT_SET};
use crate::cpuset::{CpuBucket, CpuSet};
use crate::error::{DaemonError, Result};
use crate::models::{Container, QosClass};
use crate::state::DaemonState;
use std::sync::Arc;

/// Consumes CPUs from the head of the first range that still has room,
/// ignoring topology entirely. Memory pinning is not offered here; the
/// configuration layer rejects the combination at startup.
pub struct DefaultAllocator {
    ctrl: Arc<dyn CgroupController>,
}

impl DefaultAllocator {
    pub fn new(ctrl: Arc<dyn CgroupController>) -> Self {
        Self { ctrl }
    }

    pub(crate) async fn take_cpus(&self, c: &Container, s: &mut DaemonState) -> Result<()> {
        if c.qos != QosClass::Guaranteed || c.cpus == 0 {
            return Ok(());
        }

        for i in 0..s.available_cpus.len() {
            let bucket = s.available_cpus[i];
            // Strictly larger: a range is never fully drained, so the pool
            // always keeps a tail for system processes.
            if bucket.len() > c.cpus {
                let start = bucket.start_cpu;
                let end = bucket.start_cpu + c.cpus - 1;
                s.available_cpus[i].start_cpu = end + 1;
                s.allocated
                    .insert(c.cid.clone(), vec![CpuBucket::new(start, end)]);

                let cpus = if start == end {
                    start.to_string()
                } else {
                    format!("{start}-{end}")
                };
                return self
                    .ctrl
                    .update_cpuset(&s.cgroup_root, c, &cpus, RESOURCE_NOT_SET)
                    .await;
            }
        }
        Err(DaemonError::CpusNotAvailable(
            "no available cpus for take request".to_string(),
        ))
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

        // Reabsorb only a bucket that abuts an available range's start; the
        // pool fragments when frees arrive out of order.
        for bucket in &mut s.available_cpus {
            if freed[0].end_cpu + 1 == bucket.start_cpu {
                bucket.start_cpu = freed[0].start_cpu;
            }
        }
        Ok(())
    }

    pub(crate) async fn clear_cpus(&self, c: &Container, s: &mut DaemonState) -> Result<()> {
        let mut all = s.available_cpus.clone();
        for allocated in s.allocated.values() {
            all.extend_from_slice(allocated);
        }
        let cpus = CpuSet::from_buckets(&all);
        self.ctrl
            .update_cpuset(&s.cgroup_root, c, &cpus.to_cpu_string(), RESOURCE_NOT_SET)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{container, state_with_available, RecordingController};

    fn allocator() -> (DefaultAllocator, Arc<RecordingController>) {
        let ctrl = Arc::new(RecordingController::new());
        (DefaultAllocator::new(ctrl.clone()), ctrl)
    }

    #[tokio::test]
    async fn sequential_takes_cut_the_range_head() {
        let (alloc, ctrl) = allocator();
        let mut state = state_with_available(&[CpuBucket::new(0, 127)]);

        let c1 = container("containerd://c1", "p1", QosClass::Guaranteed, 10);
        alloc.take_cpus(&c1, &mut state).await.unwrap();
        assert_eq!(state.allocated["containerd://c1"], vec![CpuBucket::new(0, 9)]);
        assert_eq!(state.available_cpus, vec![CpuBucket::new(10, 127)]);
        assert_eq!(ctrl.last_write().unwrap().cpus, "0-9");

        let c2 = container("containerd://c2", "p2", QosClass::Guaranteed, 10);
        alloc.take_cpus(&c2, &mut state).await.unwrap();
        assert_eq!(state.allocated["containerd://c2"], vec![CpuBucket::new(10, 19)]);
        assert_eq!(state.available_cpus, vec![CpuBucket::new(20, 127)]);

        alloc.free_cpus(&c2, &mut state).await.unwrap();
        assert_eq!(state.available_cpus, vec![CpuBucket::new(10, 127)]);
        assert!(!state.allocated.contains_key("containerd://c2"));
    }

    #[tokio::test]
    async fn non_guaranteed_containers_are_ignored() {
        let (alloc, ctrl) = allocator();
        let mut state = state_with_available(&[CpuBucket::new(0, 7)]);

        let burstable = container("containerd://b", "p1", QosClass::Burstable, 4);
        alloc.take_cpus(&burstable, &mut state).await.unwrap();
        alloc.free_cpus(&burstable, &mut state).await.unwrap();
        assert!(state.allocated.is_empty());
        assert!(ctrl.writes().is_empty());
    }

    #[tokio::test]
    async fn take_requires_a_strictly_larger_range() {
        let (alloc, _ctrl) = allocator();
        let mut state = state_with_available(&[CpuBucket::new(0, 3)]);

        // Exactly range-sized requests do not fit under the strict check.
        let c = container("containerd://c1", "p1", QosClass::Guaranteed, 4);
        let err = alloc.take_cpus(&c, &mut state).await.unwrap_err();
        assert!(matches!(err, DaemonError::CpusNotAvailable(_)));
        assert_eq!(state.available_cpus, vec![CpuBucket::new(0, 3)]);
        assert!(state.allocated.is_empty());
    }

    #[tokio::test]
    async fn single_cpu_take_writes_a_single_id() {
        let (alloc, ctrl) = allocator();
        let mut state = state_with_available(&[CpuBucket::new(5, 20)]);
        let c = container("containerd://c1", "p1", QosClass::Guaranteed, 1);
        alloc.take_cpus(&c, &mut state).await.unwrap();
        assert_eq!(ctrl.last_write().unwrap().cpus, "5");
    }

    #[tokio::test]
    async fn gap_creating_frees_leave_the_pool_fragmented() {
        let (alloc, _ctrl) = allocator();
        let mut state = state_with_available(&[CpuBucket::new(0, 15)]);

        let c1 = container("containerd://c1", "p1", QosClass::Guaranteed, 4);
        let c2 = container("containerd://c2", "p2", QosClass::Guaranteed, 4);
        alloc.take_cpus(&c1, &mut state).await.unwrap();
        alloc.take_cpus(&c2, &mut state).await.unwrap();
        assert_eq!(state.available_cpus, vec![CpuBucket::new(8, 15)]);

        // c1's bucket [0,3] does not touch the available range start (8), so
        // it is simply dropped from tracking.
        alloc.free_cpus(&c1, &mut state).await.unwrap();
        assert_eq!(state.available_cpus, vec![CpuBucket::new(8, 15)]);

        // c2's bucket [4,7] abuts 8 and is reabsorbed.
        alloc.free_cpus(&c2, &mut state).await.unwrap();
        assert_eq!(state.available_cpus, vec![CpuBucket::new(4, 15)]);
    }

    #[tokio::test]
    async fn free_of_unknown_container_fails() {
        let (alloc, _ctrl) = allocator();
        let mut state = state_with_available(&[CpuBucket::new(0, 7)]);
        let c = container("containerd://ghost", "p1", QosClass::Guaranteed, 1);
        assert!(matches!(
            alloc.free_cpus(&c, &mut state).await,
            Err(DaemonError::ContainerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn clear_widens_to_available_plus_allocated() {
        let (alloc, ctrl) = allocator();
        let mut state = state_with_available(&[CpuBucket::new(0, 7)]);
        let c1 = container("containerd://c1", "p1", QosClass::Guaranteed, 2);
        alloc.take_cpus(&c1, &mut state).await.unwrap();

        alloc.clear_cpus(&c1, &mut state).await.unwrap();
        assert_eq!(ctrl.last_write().unwrap().cpus, "0,1,2,3,4,5,6,7");
    }
}
